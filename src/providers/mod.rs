//! Generation provider clients
//!
//! Thin, value-preserving pass-throughs: one prompt in, the provider's
//! payload out. Upstream failures are mapped into [`ProviderError`] and
//! logged server-side; callers only ever see the generic 500 body.

mod speech;
mod text;

pub use speech::{SpeechClient, SpeechConfig};
pub use text::{ClaudeTextClient, ClaudeTextConfig, OpenAiTextClient, OpenAiTextConfig};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },
    #[error("provider response invalid: {0}")]
    InvalidPayload(String),
}

/// Synthesized audio returned by the speech backend.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, prompt: &str) -> Result<SpeechAudio, ProviderError>;
}

#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// The upstream backends the gateway dispatches admitted requests to.
pub struct ProviderSet {
    pub speech: Arc<dyn SpeechBackend>,
    pub openai: Arc<dyn TextBackend>,
    pub claude: Arc<dyn TextBackend>,
}
