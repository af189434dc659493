use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prompt_gateway::admission::{current_period, AdmissionController, RocksUsageStore, UsageStore};
use prompt_gateway::config::{load_config, GatewayConfig};
use prompt_gateway::metrics;
use prompt_gateway::providers::{
    ClaudeTextClient, ClaudeTextConfig, OpenAiTextClient, OpenAiTextConfig, ProviderSet,
    SpeechClient, SpeechConfig,
};
use prompt_gateway::server::{build_router, GatewayHealth, GatewayState};

#[derive(Parser)]
#[command(
    name = "prompt-gateway",
    version,
    about = "Quota-gated gateway in front of speech and text generation providers"
)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the HTTP server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Prometheus metrics port, 0 disables (overrides config)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Directory for the usage counter store (overrides config)
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Allow-listed client identifier, exempt from quota (repeat)
    #[arg(long = "allow-client", value_name = "ID")]
    allow_client: Vec<String>,

    /// Disable all quota accounting (unsafe; operational debugging only)
    #[arg(long)]
    bypass_quota: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("Starting prompt-gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config.as_ref()).await?;
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, &cli);

    let _metrics_server = metrics::spawn_metrics_server(config.metrics_port);

    run_server(config).await
}

fn init_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().context("Invalid log level")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn apply_cli_overrides(config: &mut GatewayConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(metrics_port) = cli.metrics_port {
        config.metrics_port = metrics_port;
    }
    if let Some(store_path) = cli.store_path.clone() {
        config.store_path = store_path;
    }
    config.allow_list.extend(cli.allow_client.iter().cloned());
    if cli.bypass_quota {
        config.bypass_quota = true;
    }
}

async fn run_server(config: GatewayConfig) -> Result<()> {
    metrics::register_metrics();

    let store = Arc::new(
        RocksUsageStore::open(&config.store_path)
            .with_context(|| format!("failed to open usage store at {}", config.store_path.display()))?,
    );

    let allow_list: HashSet<String> = config
        .allow_list
        .iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect();

    if config.bypass_quota {
        warn!("quota bypass enabled; ALL quota protection is off");
    }
    info!(
        per_client = config.per_client_daily_limit,
        global = config.global_daily_limit,
        allow_list = allow_list.len(),
        "admission limits configured"
    );

    let admission = Arc::new(AdmissionController::new(
        store.clone(),
        allow_list,
        config.quota_limits(),
        config.bypass_quota,
        config.store_timeout(),
    ));

    let providers = Arc::new(build_providers(&config)?);

    let health = Arc::new(GatewayHealth::new());
    let state = GatewayState::new(admission, providers, Arc::clone(&health));

    state.mark_live();
    match store.usage("", &current_period()).await {
        Ok(_) => {
            state.mark_ready();
            info!("usage store readiness probe passed");
        }
        Err(err) => {
            // Served anyway: admission fails closed while unready.
            state.mark_unready(err.to_string());
            warn!(%err, "usage store readiness probe failed");
        }
    }

    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gateway on {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("gateway server exited unexpectedly")?;
    Ok(())
}

fn build_providers(config: &GatewayConfig) -> Result<ProviderSet> {
    let timeout = config.provider_timeout();
    let endpoints = &config.providers;

    let openai_key = require_env("OPENAI_API_KEY")?;
    let speech_key = env::var("GATEWAY_SPEECH_API_KEY").unwrap_or_else(|_| openai_key.clone());
    let claude_key = require_env("ANTHROPIC_API_KEY")?;

    let speech = SpeechClient::new(SpeechConfig {
        api_key: speech_key,
        model: endpoints.speech_model.clone(),
        voice: endpoints.speech_voice.clone(),
        api_base: endpoints.speech_api_base.clone(),
        timeout,
    })
    .context("failed to configure speech provider")?;

    let openai = OpenAiTextClient::new(OpenAiTextConfig {
        api_key: openai_key,
        model: endpoints.openai_model.clone(),
        api_base: endpoints.openai_api_base.clone(),
        timeout,
    })
    .context("failed to configure openai provider")?;

    let claude = ClaudeTextClient::new(ClaudeTextConfig {
        api_key: claude_key,
        model: endpoints.claude_model.clone(),
        api_base: endpoints.claude_api_base.clone(),
        max_tokens: endpoints.claude_max_tokens,
        timeout,
    })
    .context("failed to configure claude provider")?;

    Ok(ProviderSet {
        speech: Arc::new(speech),
        openai: Arc::new(openai),
        claude: Arc::new(claude),
    })
}

fn require_env(name: &str) -> Result<String> {
    let value = env::var(name).with_context(|| format!("{name} is required"))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{name} is empty");
    }
    Ok(trimmed.to_string())
}
