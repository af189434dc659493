//! Speech synthesis backend
//!
//! OpenAI-style `/audio/speech` endpoint: the prompt goes out as the
//! `input` field and the provider's audio bytes come back verbatim,
//! along with the content type it reported.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;

use super::{ProviderError, SpeechAudio, SpeechBackend};

const DEFAULT_AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub api_base: String,
    pub timeout: Duration,
}

pub struct SpeechClient {
    client: Client,
    config: SpeechConfig,
}

impl SpeechClient {
    pub fn new(config: SpeechConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::Request(
                "missing speech API key".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                ProviderError::Request(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SpeechBackend for SpeechClient {
    async fn synthesize(&self, prompt: &str) -> Result<SpeechAudio, ProviderError> {
        let url = format!(
            "{}/audio/speech",
            self.config.api_base.trim_end_matches('/')
        );
        let body = SpeechRequest {
            model: self.config.model.clone(),
            voice: self.config.voice.clone(),
            input: prompt.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Request(format!("speech request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(ProviderError::UpstreamStatus { status, detail });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_AUDIO_CONTENT_TYPE)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::InvalidPayload(format!("speech response: {err}")))?;

        if bytes.is_empty() {
            return Err(ProviderError::InvalidPayload(
                "speech response contained no audio".to_string(),
            ));
        }

        Ok(SpeechAudio {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest {
    model: String,
    voice: String,
    input: String,
}
