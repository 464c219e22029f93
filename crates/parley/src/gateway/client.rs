//! Streaming client for the Google Generative Language API.

use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::error::{GatewayError, GatewayResult};
use super::types::{GenerateContentResponse, Prompt, build_generate_request};
use super::{FragmentStream, TextGateway};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// How long the provider may go silent between fragments before the
/// stream is treated as failed.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for one streaming `generateContent` call.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    idle_timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

fn map_event_error(err: reqwest_eventsource::Error) -> GatewayError {
    use reqwest_eventsource::Error as EsError;
    match err {
        EsError::InvalidStatusCode(status, _) => GatewayError::Rejected {
            status: status.as_u16(),
            message: format!("provider returned status {}", status),
        },
        EsError::Transport(err) => GatewayError::Request(err),
        other => GatewayError::Stream(other.to_string()),
    }
}

#[async_trait]
impl TextGateway for GeminiClient {
    async fn stream_generate(&self, prompt: Prompt) -> GatewayResult<FragmentStream> {
        if self.api_key.is_empty() {
            return Err(GatewayError::MissingCredential);
        }

        let body = build_generate_request(&prompt);
        let request = self
            .http
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);

        let mut es =
            EventSource::new(request).map_err(|e| GatewayError::Stream(e.to_string()))?;

        // Fail atomically before any fragment is emitted: wait for the
        // stream to open (or the first payload) before handing it out.
        // The idle timeout bounds this wait too, so a provider that
        // accepts the connection and then goes silent cannot hang the
        // caller.
        let opened = tokio::time::timeout(self.idle_timeout, async {
            loop {
                match es.next().await {
                    Some(Ok(SseEvent::Open)) => break Ok(None),
                    Some(Ok(SseEvent::Message(msg))) => break Ok(Some(msg)),
                    Some(Err(err)) => break Err(map_event_error(err)),
                    None => {
                        break Err(GatewayError::Stream(
                            "provider closed the connection before streaming".to_string(),
                        ));
                    }
                }
            }
        })
        .await;

        let first_message = match opened {
            Ok(Ok(first)) => first,
            Ok(Err(err)) => {
                es.close();
                return Err(err);
            }
            Err(_) => {
                es.close();
                warn!(
                    "provider sent no response for {:?}, abandoning request",
                    self.idle_timeout
                );
                return Err(GatewayError::Stream(format!(
                    "no response from provider for {}s",
                    self.idle_timeout.as_secs()
                )));
            }
        };

        debug!(model = %self.model, "provider stream opened");

        let (tx, rx) = mpsc::channel::<GatewayResult<String>>(32);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let mut pending = first_message;
            loop {
                let event = match pending.take() {
                    Some(msg) => Some(Ok(SseEvent::Message(msg))),
                    None => match tokio::time::timeout(idle_timeout, es.next()).await {
                        Ok(event) => event,
                        Err(_) => {
                            warn!("provider stream idle for {:?}, giving up", idle_timeout);
                            let _ = tx
                                .send(Err(GatewayError::Stream(format!(
                                    "no output from provider for {}s",
                                    idle_timeout.as_secs()
                                ))))
                                .await;
                            break;
                        }
                    },
                };

                match event {
                    Some(Ok(SseEvent::Open)) => {}
                    Some(Ok(SseEvent::Message(msg))) => {
                        let chunk: GenerateContentResponse = match serde_json::from_str(&msg.data)
                        {
                            Ok(chunk) => chunk,
                            Err(err) => {
                                let _ = tx
                                    .send(Err(GatewayError::Parse(format!(
                                        "bad stream chunk: {}",
                                        err
                                    ))))
                                    .await;
                                break;
                            }
                        };
                        let text = chunk.fragment_text();
                        if text.is_empty() {
                            continue;
                        }
                        if tx.send(Ok(text)).await.is_err() {
                            // Consumer went away; release the upstream
                            // connection promptly.
                            break;
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => break,
                    Some(Err(err)) => {
                        let _ = tx.send(Err(map_event_error(err))).await;
                        break;
                    }
                }
            }
            es.close();
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
