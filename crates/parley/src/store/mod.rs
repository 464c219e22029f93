//! Collaborator interfaces for durable state.
//!
//! The synchronizer treats persistence as two external collaborators: an
//! append-only, per-conversation ordered [`MessageLog`] observable through
//! subscriptions, and a content-addressable [`BlobStore`] returning a
//! retrievable URL per uploaded object. [`MemoryLog`] and [`MemoryBlobStore`]
//! back tests and embedded use; [`SqliteLog`] and [`FsBlobStore`] are the
//! durable implementations.

mod blob;
mod db;
mod memory;
mod observer;
mod sqlite;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use db::LogDb;
pub use memory::MemoryLog;
pub use observer::{ObserverRegistry, Subscription};
pub use sqlite::SqliteLog;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Conversation, Message, MessagePatch, NewMessage};

/// Errors from message log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type LogResult<T> = Result<T, LogError>;

/// Callback invoked with the full ordered message list on every change.
pub type LogObserver = dyn Fn(Vec<Message>) + Send + Sync;

/// The durable, subscribable, ordered message store.
///
/// The log is the ordering authority: `messages` returns entries strictly
/// by creation time ascending (with a stable tiebreak for equal
/// timestamps), and every mutation notifies subscribers for the affected
/// conversation with the fresh full list.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Create a conversation with the given title.
    async fn create_conversation(&self, title: &str) -> LogResult<Conversation>;

    /// List all conversations, newest first, pinned ones leading.
    async fn list_conversations(&self) -> LogResult<Vec<Conversation>>;

    /// Replace a conversation's title.
    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> LogResult<()>;

    /// Set or clear the pinned flag.
    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> LogResult<()>;

    /// Delete a conversation and all of its messages.
    async fn delete_conversation(&self, conversation_id: &str) -> LogResult<()>;

    /// Append a message; the log assigns identifier and timestamp.
    async fn append(&self, conversation_id: &str, message: NewMessage) -> LogResult<Message>;

    /// Apply a patch to a message. Creation time and identifier are
    /// preserved; an update time is recorded.
    async fn update(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> LogResult<()>;

    /// Delete a single message.
    async fn delete(&self, conversation_id: &str, message_id: &str) -> LogResult<()>;

    /// The full ordered message list for a conversation.
    async fn messages(&self, conversation_id: &str) -> LogResult<Vec<Message>>;

    /// The newest `limit` messages, returned oldest-first.
    async fn recent(&self, conversation_id: &str, limit: usize) -> LogResult<Vec<Message>>;

    /// Register an observer for a conversation. The returned handle
    /// unsubscribes on drop; no notifications are delivered after that.
    fn subscribe(&self, conversation_id: &str, observer: Box<LogObserver>) -> Subscription;
}
