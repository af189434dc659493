//! Gateway configuration
//!
//! Defaults < YAML config file < `GATEWAY_*` environment variables <
//! CLI flags. Provider API keys are read from the environment only and
//! never live in the config file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::admission::QuotaLimits;

pub const PER_CLIENT_LIMIT_ENV: &str = "GATEWAY_PER_CLIENT_DAILY_LIMIT";
pub const GLOBAL_LIMIT_ENV: &str = "GATEWAY_GLOBAL_DAILY_LIMIT";
pub const BYPASS_ENV: &str = "GATEWAY_QUOTA_BYPASS";
pub const STORE_TIMEOUT_MS_ENV: &str = "GATEWAY_STORE_TIMEOUT_MS";
pub const ALLOW_LIST_ENV: &str = "GATEWAY_ALLOW_LIST";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// Prometheus metrics port (0 disables the metrics server).
    pub metrics_port: u16,
    /// Directory holding the usage counter store.
    pub store_path: PathBuf,
    /// Upper bound on a single store transaction, in milliseconds.
    pub store_timeout_ms: u64,
    /// Maximum admitted requests per client per UTC day.
    pub per_client_daily_limit: u64,
    /// Maximum admitted requests across all clients per UTC day.
    pub global_daily_limit: u64,
    /// Disable all quota accounting (operational debugging only).
    pub bypass_quota: bool,
    /// Client identifiers exempt from quota enforcement.
    pub allow_list: Vec<String>,
    pub providers: ProviderEndpoints,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            metrics_port: 0,
            store_path: PathBuf::from("data/usage"),
            store_timeout_ms: 5_000,
            per_client_daily_limit: 100,
            global_daily_limit: 1_000,
            bypass_quota: false,
            allow_list: Vec::new(),
            providers: ProviderEndpoints::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoints {
    pub speech_api_base: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub openai_api_base: String,
    pub openai_model: String,
    pub claude_api_base: String,
    pub claude_model: String,
    pub claude_max_tokens: u32,
    /// Upstream request timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            speech_api_base: "https://api.openai.com/v1".to_string(),
            speech_model: "tts-1".to_string(),
            speech_voice: "alloy".to_string(),
            openai_api_base: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            claude_api_base: "https://api.anthropic.com/v1".to_string(),
            claude_model: "claude-3-5-haiku-latest".to_string(),
            claude_max_tokens: 1_024,
            request_timeout_secs: 60,
        }
    }
}

impl GatewayConfig {
    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            per_client: self.per_client_daily_limit,
            global: self.global_daily_limit,
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.request_timeout_secs)
    }

    /// Apply `GATEWAY_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.per_client_daily_limit = env_number(PER_CLIENT_LIMIT_ENV, self.per_client_daily_limit);
        self.global_daily_limit = env_number(GLOBAL_LIMIT_ENV, self.global_daily_limit);
        self.store_timeout_ms = env_number(STORE_TIMEOUT_MS_ENV, self.store_timeout_ms);
        self.bypass_quota = env_flag(BYPASS_ENV, self.bypass_quota);
        if let Ok(raw) = env::var(ALLOW_LIST_ENV) {
            self.allow_list.extend(
                raw.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string),
            );
        }
    }
}

fn env_number(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value,
            Err(err) => {
                warn!(?err, name, value = raw, "invalid numeric env override");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Load the config file, falling back to defaults when it is absent.
pub async fn load_config(config_path: Option<&PathBuf>) -> Result<GatewayConfig> {
    let Some(path) = config_path else {
        return Ok(GatewayConfig::default());
    };

    if path.exists() {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: GatewayConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    } else {
        warn!("Config file not found, using defaults: {}", path.display());
        Ok(GatewayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = GatewayConfig::default();
        assert_eq!(config.per_client_daily_limit, 100);
        assert_eq!(config.global_daily_limit, 1_000);
        assert!(!config.bypass_quota);
        assert!(config.allow_list.is_empty());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: GatewayConfig = serde_yaml::from_str(
            "per_client_daily_limit: 5\nallow_list:\n  - 203.0.113.7\n",
        )
        .expect("valid yaml");
        assert_eq!(config.per_client_daily_limit, 5);
        assert_eq!(config.global_daily_limit, 1_000);
        assert_eq!(config.allow_list, vec!["203.0.113.7".to_string()]);
    }

    #[test]
    fn env_number_rejects_garbage() {
        env::set_var("GATEWAY_TEST_ENV_NUMBER", "not-a-number");
        assert_eq!(env_number("GATEWAY_TEST_ENV_NUMBER", 42), 42);
        env::set_var("GATEWAY_TEST_ENV_NUMBER", "7");
        assert_eq!(env_number("GATEWAY_TEST_ENV_NUMBER", 42), 7);
        env::remove_var("GATEWAY_TEST_ENV_NUMBER");
    }

    #[test]
    fn env_flag_accepts_common_truthy_values() {
        for raw in ["1", "true", "yes", "on"] {
            env::set_var("GATEWAY_TEST_ENV_FLAG", raw);
            assert!(env_flag("GATEWAY_TEST_ENV_FLAG", false));
        }
        env::set_var("GATEWAY_TEST_ENV_FLAG", "0");
        assert!(!env_flag("GATEWAY_TEST_ENV_FLAG", true));
        env::remove_var("GATEWAY_TEST_ENV_FLAG");
    }
}
