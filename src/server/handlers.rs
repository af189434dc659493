//! Generation route handlers
//!
//! Every provider route runs the same gate: resolve the client
//! identifier, ask the admission controller, then dispatch. Denials and
//! provider failures surface as the fixed 429/500 JSON bodies; provider
//! detail is logged server-side only.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::GatewayError;
use crate::identity::resolve_client_id;
use crate::providers::TextBackend;

use super::state::GatewayState;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct TextResponse {
    text: String,
}

pub(crate) async fn speech_handler(
    State(state): State<GatewayState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let client_id = match gate(&state, peer, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };

    match state.providers.speech.synthesize(&req.prompt).await {
        Ok(audio) => {
            let content_type = HeaderValue::from_str(&audio.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            ([(header::CONTENT_TYPE, content_type)], audio.bytes).into_response()
        }
        Err(err) => {
            error!(%err, client_id, "speech synthesis failed");
            GatewayError::Provider.into_response()
        }
    }
}

pub(crate) async fn openai_text_handler(
    State(state): State<GatewayState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let backend = state.providers.openai.clone();
    text_route(state, peer, headers, req, backend.as_ref(), "openai").await
}

pub(crate) async fn claude_text_handler(
    State(state): State<GatewayState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let backend = state.providers.claude.clone();
    text_route(state, peer, headers, req, backend.as_ref(), "claude").await
}

pub(crate) async fn not_found_handler() -> Response {
    GatewayError::NotFound.into_response()
}

async fn text_route(
    state: GatewayState,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    req: GenerateRequest,
    backend: &dyn TextBackend,
    route: &'static str,
) -> Response {
    let client_id = match gate(&state, peer, &headers).await {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };

    match backend.generate(&req.prompt).await {
        Ok(text) => Json(TextResponse { text }).into_response(),
        Err(err) => {
            error!(%err, client_id, route, "text generation failed");
            GatewayError::Provider.into_response()
        }
    }
}

/// Resolve the caller's identity and run admission. The identifier is
/// returned for log context on the dispatch path.
async fn gate(
    state: &GatewayState,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
) -> Result<String, GatewayError> {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok());
    let client_id = resolve_client_id(peer.map(|ConnectInfo(addr)| addr), forwarded);

    if state.admission.admit(&client_id).await {
        Ok(client_id)
    } else {
        Err(GatewayError::RateLimited)
    }
}
