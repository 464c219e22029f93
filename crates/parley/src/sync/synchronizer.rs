//! Turn orchestration and observable state.
//!
//! [`Synchronizer`] owns the full lifecycle of a user turn: lazy
//! conversation creation, attachment upload, user commit, streaming the
//! answer through the relay while exposing a transient placeholder to
//! watchers, and committing the final answer only on clean completion.
//! The durable log stays the ordering authority; the streaming placeholder
//! is merged into watcher views and never written to the log.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::SyncError;
use super::profile::BehaviorProfile;
use super::relay_client::{RelayClient, StreamEvent};
use super::session::{StreamSessionSnapshot, StreamSessions};
use crate::api::ChatRequest;
use crate::gateway::InlineFile;
use crate::models::{
    Conversation, Message, MessagePatch, MessageRole, NewMessage, derive_title,
};
use crate::store::{BlobStore, LogError, LogObserver, MessageLog, ObserverRegistry, Subscription};

/// Tunables for turn construction.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How many trailing messages to render as continuity context.
    pub context_window: usize,
    /// Character limit for titles derived from the first message.
    pub title_limit: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            context_window: 6,
            title_limit: 30,
        }
    }
}

/// One file the caller wants attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    /// Declared media type; guessed from the name when absent.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Result of a completed send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The conversation the turn ran in (freshly created when the caller
    /// passed none).
    pub conversation_id: String,
    /// The committed user message.
    pub user: Message,
    /// The committed answer, absent when the model produced no text.
    pub assistant: Option<Message>,
}

/// Keeps durable conversation state and in-flight streams consistent.
pub struct Synchronizer {
    log: Arc<dyn MessageLog>,
    blobs: Arc<dyn BlobStore>,
    relay: Arc<dyn RelayClient>,
    sessions: StreamSessions,
    /// Watcher callbacks notified on fragment arrival, in addition to the
    /// log's own change notifications.
    watchers: ObserverRegistry,
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(
        log: Arc<dyn MessageLog>,
        blobs: Arc<dyn BlobStore>,
        relay: Arc<dyn RelayClient>,
    ) -> Self {
        Self {
            log,
            blobs,
            relay,
            sessions: StreamSessions::new(),
            watchers: ObserverRegistry::new(),
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one full user turn.
    ///
    /// Without a conversation id, a conversation is created first with a
    /// title derived from the message text. Attachments upload before the
    /// user message is committed; an upload failure aborts the whole turn
    /// with the log untouched. The answer commits only after the stream
    /// completed cleanly with non-empty text.
    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        text: &str,
        profile: BehaviorProfile,
        files: Vec<FilePayload>,
    ) -> Result<SendOutcome, SyncError> {
        let conversation_id = match conversation_id {
            Some(id) if !id.is_empty() && !id.starts_with("temp-") => id.to_string(),
            _ => {
                let title = derive_title(text, self.options.title_limit);
                let conversation = self.log.create_conversation(&title).await?;
                info!(conversation = %conversation.id, "created conversation");
                conversation.id
            }
        };

        let mut attachments = Vec::new();
        let mut inline = Vec::new();
        for file in &files {
            let attachment = self
                .blobs
                .put(
                    &conversation_id,
                    &file.name,
                    file.media_type.as_deref(),
                    &file.bytes,
                )
                .await?;
            inline.push((
                file.name.clone(),
                InlineFile {
                    mime_type: attachment.media_type.clone(),
                    data: BASE64.encode(&file.bytes),
                },
            ));
            attachments.push(attachment);
        }

        let user = self
            .log
            .append(
                &conversation_id,
                NewMessage::user(text).with_attachments(attachments),
            )
            .await?;

        let assistant = self
            .run_turn(&conversation_id, text, profile, &inline)
            .await?;

        Ok(SendOutcome {
            conversation_id,
            user,
            assistant,
        })
    }

    /// Replace a user message's content and regenerate its answer.
    ///
    /// The immediate assistant successor, when present, is superseded and
    /// deleted before the turn re-runs; its absence is not an error. The
    /// edited message keeps its identifier, position, and creation time.
    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        new_text: &str,
        profile: BehaviorProfile,
    ) -> Result<Option<Message>, SyncError> {
        if self.sessions.is_active(conversation_id) {
            return Err(SyncError::StreamInProgress);
        }

        let messages = self.log.messages(conversation_id).await?;
        let index = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| LogError::MessageNotFound(message_id.to_string()))?;
        if messages[index].role != MessageRole::User {
            return Err(SyncError::NotUserMessage(message_id.to_string()));
        }

        if let Some(successor) = messages.get(index + 1) {
            if successor.role == MessageRole::Assistant {
                self.log.delete(conversation_id, &successor.id).await?;
            }
        }

        self.log
            .update(conversation_id, message_id, MessagePatch::content(new_text))
            .await?;

        self.run_turn(conversation_id, new_text, profile, &[]).await
    }

    /// Delete a message. Deleting a user message also deletes its
    /// immediate assistant successor, so no orphaned answer survives.
    pub async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), SyncError> {
        if self.sessions.is_active(conversation_id) {
            return Err(SyncError::StreamInProgress);
        }

        let messages = self.log.messages(conversation_id).await?;
        let index = messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| LogError::MessageNotFound(message_id.to_string()))?;
        let target_role = messages[index].role;
        let successor = messages.get(index + 1).cloned();

        self.log.delete(conversation_id, message_id).await?;

        if target_role == MessageRole::User {
            if let Some(successor) = successor {
                if successor.role == MessageRole::Assistant {
                    self.log.delete(conversation_id, &successor.id).await?;
                }
            }
        }
        Ok(())
    }

    /// Observe a conversation. The callback receives the full ordered
    /// message list with the in-flight placeholder merged in, on every
    /// durable change and on every received fragment. Dropping the handle
    /// stops delivery.
    pub fn watch(&self, conversation_id: &str, callback: Box<LogObserver>) -> WatchHandle {
        let merging: Arc<LogObserver> = {
            let sessions = self.sessions.clone();
            let conversation_id = conversation_id.to_string();
            let callback: Arc<LogObserver> = Arc::from(callback);
            Arc::new(move |messages: Vec<Message>| {
                let merged = merge_stream_state(messages, sessions.snapshot(&conversation_id));
                callback(merged);
            })
        };

        let fragment_sub = self.watchers.register(conversation_id, {
            let merging = Arc::clone(&merging);
            Box::new(move |messages| merging(messages))
        });
        let log_sub = self
            .log
            .subscribe(conversation_id, Box::new(move |messages| merging(messages)));

        WatchHandle {
            _fragments: fragment_sub,
            _log: log_sub,
        }
    }

    /// The current message view: the durable list with the streaming
    /// placeholder merged in.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, SyncError> {
        let messages = self.log.messages(conversation_id).await?;
        Ok(merge_stream_state(
            messages,
            self.sessions.snapshot(conversation_id),
        ))
    }

    /// Whether an answer is currently streaming for this conversation.
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.sessions.is_active(conversation_id)
    }

    pub async fn new_conversation(&self) -> Result<Conversation, SyncError> {
        Ok(self.log.create_conversation("New Chat").await?)
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        Ok(self.log.list_conversations().await?)
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<(), SyncError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SyncError::EmptyTitle);
        }
        Ok(self.log.rename_conversation(conversation_id, title).await?)
    }

    pub async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> Result<(), SyncError> {
        Ok(self.log.set_pinned(conversation_id, pinned).await?)
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), SyncError> {
        if self.sessions.is_active(conversation_id) {
            return Err(SyncError::StreamInProgress);
        }
        Ok(self.log.delete_conversation(conversation_id).await?)
    }

    /// Stream one answer into the conversation.
    ///
    /// The session guard drops before any commit, so watchers never see
    /// the placeholder next to the durable answer. Every exit path,
    /// completion, empty output, or failure, clears the session.
    async fn run_turn(
        &self,
        conversation_id: &str,
        text: &str,
        profile: BehaviorProfile,
        files: &[(String, InlineFile)],
    ) -> Result<Option<Message>, SyncError> {
        // The placeholder appears to watchers before the context read,
        // so they render the in-flight turn without waiting on the log.
        let guard = self.sessions.begin(conversation_id);
        self.notify_watchers(conversation_id).await;

        let outcome = match self
            .build_request(conversation_id, text, profile, files)
            .await
        {
            Ok(request) => self.stream_turn(conversation_id, request).await,
            Err(err) => Err(err),
        };

        drop(guard);

        match outcome {
            Ok(full) if !full.trim().is_empty() => {
                let message = self
                    .log
                    .append(conversation_id, NewMessage::assistant(full))
                    .await?;
                Ok(Some(message))
            }
            Ok(_) => {
                debug!(
                    conversation = conversation_id,
                    "stream completed with empty output"
                );
                self.notify_watchers(conversation_id).await;
                Ok(None)
            }
            Err(err) => {
                warn!(
                    conversation = conversation_id,
                    error = %err,
                    "turn failed; discarding partial output"
                );
                self.notify_watchers(conversation_id).await;
                Err(err)
            }
        }
    }

    async fn stream_turn(
        &self,
        conversation_id: &str,
        request: ChatRequest,
    ) -> Result<String, SyncError> {
        let mut stream = self.relay.open_stream(request).await?;
        let mut full = String::new();
        let mut completed = false;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Fragment(fragment) => {
                    full.push_str(&fragment);
                    self.sessions.append(conversation_id, &fragment);
                    self.notify_watchers(conversation_id).await;
                }
                StreamEvent::Done => {
                    completed = true;
                    break;
                }
            }
        }

        if !completed {
            return Err(SyncError::StreamFailed(
                "stream ended without completion marker".to_string(),
            ));
        }
        Ok(full)
    }

    async fn build_request(
        &self,
        conversation_id: &str,
        text: &str,
        profile: BehaviorProfile,
        files: &[(String, InlineFile)],
    ) -> Result<ChatRequest, SyncError> {
        let recent = self
            .log
            .recent(conversation_id, self.options.context_window)
            .await?;
        let context: Vec<String> = recent.iter().map(Message::context_line).collect();

        let mut message = text.to_string();
        for (name, _) in files {
            message.push_str(&format!("\n\n[Attached file: {}]", name));
        }
        message.push_str("\n\nContext:\n");
        message.push_str(&context.join("\n"));

        let instructions = format!(
            "{} Analyze attachments if any before responding.",
            profile.instruction()
        );

        Ok(ChatRequest {
            message,
            instructions: Some(instructions),
            top_p: None,
            top_k: None,
            files: if files.is_empty() {
                None
            } else {
                Some(files.iter().map(|(_, inline)| inline.clone()).collect())
            },
        })
    }

    /// Push the merged current view to fragment watchers.
    async fn notify_watchers(&self, conversation_id: &str) {
        if self.watchers.observer_count(conversation_id) == 0 {
            return;
        }
        match self.log.messages(conversation_id).await {
            Ok(messages) => self.watchers.notify(conversation_id, &messages),
            Err(err) => warn!(
                conversation = conversation_id,
                error = %err,
                "failed to load messages for watcher notification"
            ),
        }
    }
}

/// Handle keeping a [`Synchronizer::watch`] registration alive.
pub struct WatchHandle {
    _fragments: Subscription,
    _log: Subscription,
}

/// Merge the active streaming session into a durable message list.
///
/// When a session exists and its placeholder id is not already present,
/// a pending assistant entry is appended; durable messages are never
/// reordered or rewritten. Applying the merge twice yields the same list.
pub fn merge_stream_state(
    mut messages: Vec<Message>,
    session: Option<StreamSessionSnapshot>,
) -> Vec<Message> {
    let Some(session) = session else {
        return messages;
    };
    if messages.iter().any(|m| m.id == session.temp_id) {
        return messages;
    }
    messages.push(Message {
        id: session.temp_id,
        role: MessageRole::Assistant,
        content: session.partial,
        created_at: Utc::now(),
        updated_at: None,
        attachments: Vec::new(),
        pending: true,
    });
    messages
}
