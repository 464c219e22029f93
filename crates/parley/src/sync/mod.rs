//! Conversation synchronizer.
//!
//! Client-side logic that drives one user turn end-to-end against the
//! relay, keeps the per-conversation streaming state, and merges the
//! in-flight placeholder into the durable observable message view.

mod profile;
mod relay_client;
mod session;
mod synchronizer;

pub use profile::BehaviorProfile;
pub use relay_client::{
    HttpRelayClient, RelayClient, RelayError, RelayStream, SseLineDecoder, StreamEvent,
};
pub use session::{SessionGuard, StreamSessionSnapshot, StreamSessions};
pub use synchronizer::{
    FilePayload, SendOutcome, SyncOptions, Synchronizer, WatchHandle, merge_stream_state,
};

use thiserror::Error;

use crate::store::{BlobError, LogError};

/// Errors from synchronizer operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A StreamSession is active for this conversation; edits, deletes
    /// and new sends must wait for it to finish.
    #[error("A response is still streaming for this conversation")]
    StreamInProgress,

    /// An attachment upload failed; the turn was aborted before any
    /// message was committed.
    #[error("Attachment upload failed: {0}")]
    Upload(#[from] BlobError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The stream ended without a clean completion; accumulated text was
    /// discarded rather than committed as a truncated answer.
    #[error("Stream ended before completion: {0}")]
    StreamFailed(String),

    /// Edit targets must be user messages.
    #[error("Message {0} is not a user message")]
    NotUserMessage(String),

    #[error("Conversation title cannot be empty")]
    EmptyTitle,
}
