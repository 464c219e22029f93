//! Chat relay handler.
//!
//! Accepts one chat request and re-emits the provider's output as a
//! `text/event-stream` body: one `data: {"text": ...}` block per
//! fragment, in order, terminated by `data: [DONE]`. A provider failure
//! after the stream has started errors the transport instead of sending
//! the sentinel, so a consumer can tell a clean end from a truncated one.

use std::io;

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::gateway::{FragmentStream, InlineFile, Prompt};

/// Terminator block recognizable without JSON parsing.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Instruction used when the caller supplies none.
const DEFAULT_INSTRUCTIONS: &str = "You are a friendly, helpful assistant. \
    Respond with informative, polite, and accurate answers. Answer clearly \
    and concisely, and avoid giving harmful advice or false information. \
    Always follow the instructions provided.";

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<InlineFile>>,
}

impl From<ChatRequest> for Prompt {
    fn from(req: ChatRequest) -> Self {
        Prompt {
            message: req.message,
            instructions: Some(
                req.instructions
                    .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            ),
            top_p: req.top_p,
            top_k: req.top_k,
            files: req.files.unwrap_or_default(),
        }
    }
}

/// `POST /api/chat` - relay one chat request as an event stream.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Response> {
    if req.message.trim().is_empty() {
        return Err(ApiError::MissingMessage);
    }

    debug!(
        files = req.files.as_ref().map(|f| f.len()).unwrap_or(0),
        "opening chat stream"
    );

    // Any failure here happens before the first byte: respond with a
    // structured error instead of opening a stream.
    let fragments = state.gateway.stream_generate(req.into()).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_frames(fragments)))
        .map_err(|e| ApiError::Provider(format!("failed to build response: {}", e)))?;

    Ok(response)
}

/// Convert a fragment stream into SSE frame bytes.
///
/// Each fragment becomes exactly one `data:` block; no batching or
/// reordering, to bound latency-to-first-token. A mid-stream gateway
/// error yields a transport error and suppresses the `[DONE]` sentinel.
pub fn sse_frames(mut fragments: FragmentStream) -> ReceiverStream<Result<Bytes, io::Error>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(32);

    tokio::spawn(async move {
        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    let payload = serde_json::json!({ "text": text });
                    let frame = Bytes::from(format!("data: {}\n\n", payload));
                    if tx.send(Ok(frame)).await.is_err() {
                        // Client disconnected; drop the upstream stream.
                        return;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
                    return;
                }
            }
        }
        let _ = tx
            .send(Ok(Bytes::from(format!("data: {}\n\n", DONE_SENTINEL))))
            .await;
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::gateway::{GatewayError, GatewayResult, TextGateway};
    use async_trait::async_trait;
    use axum_test::TestServer;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Gateway fixture emitting a scripted fragment sequence.
    struct StubGateway {
        script: Vec<GatewayResult<String>>,
        /// Prompt captured from the last call.
        last_prompt: Mutex<Option<Prompt>>,
        open_error: Option<GatewayError>,
    }

    impl StubGateway {
        fn fragments(fragments: &[&str]) -> Self {
            Self {
                script: fragments.iter().map(|f| Ok(f.to_string())).collect(),
                last_prompt: Mutex::new(None),
                open_error: None,
            }
        }

        fn failing_open(err: GatewayError) -> Self {
            Self {
                script: Vec::new(),
                last_prompt: Mutex::new(None),
                open_error: Some(err),
            }
        }

        fn fragments_then_error(fragments: &[&str]) -> Self {
            let mut script: Vec<GatewayResult<String>> =
                fragments.iter().map(|f| Ok(f.to_string())).collect();
            script.push(Err(GatewayError::Stream("provider went away".to_string())));
            Self {
                script,
                last_prompt: Mutex::new(None),
                open_error: None,
            }
        }
    }

    #[async_trait]
    impl TextGateway for StubGateway {
        async fn stream_generate(&self, prompt: Prompt) -> GatewayResult<FragmentStream> {
            *self.last_prompt.lock().await = Some(prompt);
            if let Some(err) = &self.open_error {
                return Err(match err {
                    GatewayError::MissingCredential => GatewayError::MissingCredential,
                    other => GatewayError::Stream(other.to_string()),
                });
            }
            let script: Vec<GatewayResult<String>> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(text.clone()),
                    Err(err) => Err(GatewayError::Stream(err.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(script)))
        }
    }

    fn server(gateway: Arc<StubGateway>) -> TestServer {
        let state = AppState::new(gateway);
        TestServer::new(create_router(state, None)).unwrap()
    }

    #[tokio::test]
    async fn test_stream_reconstruction_and_sentinel() {
        let gateway = Arc::new(StubGateway::fragments(&["Hel", "lo, ", "world!"]));
        let server = server(Arc::clone(&gateway));

        let response = server
            .post("/api/chat")
            .json(&serde_json::json!({ "message": "say hello" }))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-cache, no-transform"
        );

        let body = response.text();
        let blocks: Vec<&str> = body
            .split("\n\n")
            .filter(|b| !b.is_empty())
            .collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(*blocks.last().unwrap(), "data: [DONE]");

        // One block per fragment, in order; concatenation reconstructs
        // the full text.
        let mut full = String::new();
        for block in &blocks[..3] {
            let data = block.strip_prefix("data: ").unwrap();
            let value: serde_json::Value = serde_json::from_str(data).unwrap();
            let text = value["text"].as_str().unwrap();
            assert!(!text.is_empty());
            full.push_str(text);
        }
        assert_eq!(full, "Hello, world!");
    }

    #[tokio::test]
    async fn test_missing_message_is_plain_400() {
        let server = server(Arc::new(StubGateway::fragments(&["x"])));
        let response = server
            .post("/api/chat")
            .json(&serde_json::json!({ "message": "" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.text(), "Message is required");
    }

    #[tokio::test]
    async fn test_missing_credential_is_structured_500() {
        let server = server(Arc::new(StubGateway::failing_open(
            GatewayError::MissingCredential,
        )));
        let response = server
            .post("/api/chat")
            .json(&serde_json::json!({ "message": "hi" }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "API key not configured");
        assert_eq!(
            body["details"],
            "GEMINI_API_KEY environment variable is missing"
        );
    }

    #[tokio::test]
    async fn test_pre_stream_provider_failure_is_structured_500() {
        let server = server(Arc::new(StubGateway::failing_open(GatewayError::Stream(
            "quota exceeded".to_string(),
        ))));
        let response = server
            .post("/api/chat")
            .json(&serde_json::json!({ "message": "hi" }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "Provider request failed");
        assert!(body["details"].as_str().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_default_instructions_applied() {
        let gateway = Arc::new(StubGateway::fragments(&["ok"]));
        let server = server(Arc::clone(&gateway));
        server
            .post("/api/chat")
            .json(&serde_json::json!({ "message": "hi" }))
            .await
            .assert_status_ok();

        let prompt = gateway.last_prompt.lock().await.clone().unwrap();
        assert!(prompt.instructions.unwrap().contains("helpful assistant"));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_errors_transport_without_sentinel() {
        // Exercise the frame producer directly: the transport error must
        // arrive after the valid blocks and no [DONE] may be emitted.
        let gateway = StubGateway::fragments_then_error(&["Partial"]);
        let fragments = gateway
            .stream_generate(Prompt {
                message: "hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let frames: Vec<Result<Bytes, io::Error>> =
            sse_frames(fragments).collect::<Vec<_>>().await;

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Bytes::from("data: {\"text\":\"Partial\"}\n\n")
        );
        assert!(frames[1].is_err());
    }

    #[tokio::test]
    async fn test_empty_output_sends_only_sentinel() {
        let gateway = StubGateway::fragments(&[]);
        let fragments = gateway
            .stream_generate(Prompt {
                message: "hi".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let frames: Vec<Result<Bytes, io::Error>> =
            sse_frames(fragments).collect::<Vec<_>>().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Bytes::from("data: [DONE]\n\n")
        );
    }
}
