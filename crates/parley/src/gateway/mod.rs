//! LLM gateway client.
//!
//! Wraps a single call to the generative-AI provider and exposes the
//! result as a lazy, finite, non-restartable sequence of text fragments
//! in emission order.

mod client;
mod error;
mod types;

pub use client::GeminiClient;
pub use error::{GatewayError, GatewayResult};
pub use types::{
    DEFAULT_TOP_K, DEFAULT_TOP_P, GenerateContentResponse, InlineFile, Prompt,
    build_generate_request,
};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// Ordered stream of response text fragments. Concatenated in delivery
/// order the fragments reconstitute the full response; no fragment is
/// duplicated or reordered.
pub type FragmentStream = Pin<Box<dyn Stream<Item = GatewayResult<String>> + Send>>;

/// One streaming call to the generative-AI provider.
///
/// If the provider rejects the request (missing credential, quota,
/// malformed input) the call fails atomically before any fragment is
/// emitted.
#[async_trait]
pub trait TextGateway: Send + Sync {
    async fn stream_generate(&self, prompt: Prompt) -> GatewayResult<FragmentStream>;
}
