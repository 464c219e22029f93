//! Relay error responses.
//!
//! The wire contract distinguishes a plain-body 400 for missing input
//! from structured 500s carrying `{error, details}` JSON. The credential
//! value itself never appears in a response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::gateway::GatewayError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request carried no message text.
    #[error("Message is required")]
    MissingMessage,

    /// No provider credential is configured.
    #[error("API key not configured")]
    MissingCredential,

    /// The provider rejected the request before any stream was opened.
    #[error("Provider request failed")]
    Provider(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    details: String,
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MissingCredential => Self::MissingCredential,
            other => Self::Provider(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingMessage => {
                (StatusCode::BAD_REQUEST, "Message is required").into_response()
            }
            Self::MissingCredential => {
                error!("chat request failed: no provider credential configured");
                let body = ErrorBody {
                    error: "API key not configured".to_string(),
                    details: "GEMINI_API_KEY environment variable is missing".to_string(),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            Self::Provider(details) => {
                error!("chat request failed before streaming: {details}");
                let body = ErrorBody {
                    error: "Provider request failed".to_string(),
                    details,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
