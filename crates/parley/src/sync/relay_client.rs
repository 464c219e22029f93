//! Relay stream consumer.
//!
//! The synchronizer talks to the relay through [`RelayClient`], which opens
//! one `POST /api/chat` event stream per turn. [`SseLineDecoder`] turns the
//! raw byte stream back into fragment events, buffering across chunk
//! boundaries so a `data:` block split between two network reads still
//! parses. A stream that ends without the `[DONE]` terminator is reported
//! as an error, not as a short answer.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::api::{ChatRequest, DONE_SENTINEL};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The relay rejected the request before streaming.
    #[error("Relay returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The stream broke after it started.
    #[error("Relay stream failed: {0}")]
    Stream(String),
}

/// One decoded event from the relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An ordered piece of the answer text.
    Fragment(String),
    /// Clean end of stream.
    Done,
}

pub type RelayStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, RelayError>> + Send>>;

/// Opens relay event streams. Object-safe so tests can script responses.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Open a stream for one chat turn. Errors returned here happened
    /// before any output was produced.
    async fn open_stream(&self, request: ChatRequest) -> Result<RelayStream, RelayError>;
}

/// Incremental decoder for the relay's `data:` block framing.
///
/// Feed raw chunks in arrival order; complete blocks come out as events.
/// Incomplete trailing data stays buffered until the next chunk.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    // Byte buffer so a chunk boundary inside a multi-byte codepoint
    // cannot corrupt the text.
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self
            .buffer
            .windows(2)
            .position(|window| window == b"\n\n")
        {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block);
            for line in block.lines() {
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == DONE_SENTINEL {
                    events.push(StreamEvent::Done);
                    continue;
                }
                // A block that is not valid JSON is carried as literal
                // text rather than dropped.
                let text = match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(value) => value
                        .get("text")
                        .and_then(|t| t.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    Err(_) => data.to_string(),
                };
                if !text.is_empty() {
                    events.push(StreamEvent::Fragment(text));
                }
            }
        }
        events
    }
}

/// [`RelayClient`] over HTTP, for embedding the synchronizer in a client
/// process that talks to a remote relay.
pub struct HttpRelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRelayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    async fn open_stream(&self, request: ChatRequest) -> Result<RelayStream, RelayError> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self.http.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel::<Result<StreamEvent, RelayError>>(32);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseLineDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(RelayError::Stream(err.to_string()))).await;
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    let done = event == StreamEvent::Done;
                    if tx.send(Ok(event)).await.is_err() {
                        // Consumer dropped the stream mid-turn.
                        debug!("relay stream consumer went away");
                        return;
                    }
                    if done {
                        return;
                    }
                }
            }

            // The body ended without the terminator: report truncation so
            // the caller discards the partial text.
            let _ = tx
                .send(Err(RelayError::Stream(
                    "stream ended without completion marker".to_string(),
                )))
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_parses_blocks_and_done() {
        let mut decoder = SseLineDecoder::new();
        let events =
            decoder.push(b"data: {\"text\":\"Hel\"}\n\ndata: {\"text\":\"lo\"}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Hel".to_string()),
                StreamEvent::Fragment("lo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn test_decoder_buffers_across_chunk_boundaries() {
        let mut decoder = SseLineDecoder::new();
        // Block split mid-JSON and mid-delimiter.
        assert!(decoder.push(b"data: {\"te").is_empty());
        assert!(decoder.push(b"xt\":\"Hello\"}\n").is_empty());
        let events = decoder.push(b"\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Hello".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn test_decoder_falls_back_to_literal_text() {
        let mut decoder = SseLineDecoder::new();
        let events = decoder.push(b"data: not json\n\n");
        assert_eq!(events, vec![StreamEvent::Fragment("not json".to_string())]);
    }

    #[test]
    fn test_decoder_skips_empty_fragments() {
        let mut decoder = SseLineDecoder::new();
        let events = decoder.push(b"data: {\"text\":\"\"}\n\ndata: {\"other\":1}\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_decoder_handles_split_inside_multibyte_codepoint() {
        let mut decoder = SseLineDecoder::new();
        let frame = "data: {\"text\":\"süß\"}\n\n".as_bytes();
        // 'ü' starts at byte 16; split in the middle of it.
        assert!(decoder.push(&frame[..17]).is_empty());
        let events = decoder.push(&frame[17..]);
        assert_eq!(events, vec![StreamEvent::Fragment("süß".to_string())]);
    }
}
