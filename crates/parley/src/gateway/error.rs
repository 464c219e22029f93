//! Gateway error types.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors from the generative-AI provider call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No provider credential is configured.
    #[error("Provider credential is not configured")]
    MissingCredential,

    /// The provider rejected the request before any output was produced.
    #[error("Provider rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// HTTP transport failure.
    #[error("Provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The stream failed after it had started.
    #[error("Provider stream failed: {0}")]
    Stream(String),

    /// A provider payload could not be decoded.
    #[error("Failed to parse provider response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// Whether the failure happened before any fragment could have been
    /// emitted, meaning the caller never opened a stream.
    pub fn is_pre_stream(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::Rejected { .. })
    }
}
