//! Request-layer error responses
//!
//! The gateway exposes exactly three failure bodies; everything the
//! admission path can produce has already been folded into the 429 by
//! the time a handler sees it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("provider dispatch failed")]
    Provider,
    #[error("endpoint not found")]
    NotFound,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            GatewayError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded."),
            GatewayError::Provider => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred.",
            ),
            GatewayError::NotFound => (StatusCode::NOT_FOUND, "Endpoint not found."),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
