//! Per-conversation streaming session state.
//!
//! While a response streams, the accumulated partial text lives here under
//! the conversation id, keyed off a synthetic `temp-` message id. The
//! session is owned: [`StreamSessions::begin`] returns a guard whose drop
//! removes the entry, so every exit path from a turn, clean completion,
//! error, or panic, clears the session.

use std::sync::Arc;

use dashmap::DashMap;

use crate::models::temp_message_id;

/// Point-in-time copy of one streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSessionSnapshot {
    /// Synthetic id of the in-flight placeholder message.
    pub temp_id: String,
    /// Fragments received so far, concatenated in arrival order.
    pub partial: String,
}

/// Shared table of active streaming sessions, one per conversation at most.
#[derive(Clone, Default)]
pub struct StreamSessions {
    inner: Arc<DashMap<String, StreamSessionSnapshot>>,
}

impl StreamSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for a conversation, fully replacing any stale one.
    ///
    /// The returned guard removes the session on drop. If a later `begin`
    /// replaced this session in the meantime, the guard leaves the newer
    /// entry alone.
    pub fn begin(&self, conversation_id: &str) -> SessionGuard {
        let temp_id = temp_message_id();
        self.inner.insert(
            conversation_id.to_string(),
            StreamSessionSnapshot {
                temp_id: temp_id.clone(),
                partial: String::new(),
            },
        );
        SessionGuard {
            sessions: self.clone(),
            conversation_id: conversation_id.to_string(),
            temp_id,
        }
    }

    /// Append a fragment to the active session, if one exists.
    pub fn append(&self, conversation_id: &str, fragment: &str) {
        if let Some(mut entry) = self.inner.get_mut(conversation_id) {
            entry.partial.push_str(fragment);
        }
    }

    /// Copy of the active session for a conversation, if any.
    pub fn snapshot(&self, conversation_id: &str) -> Option<StreamSessionSnapshot> {
        self.inner.get(conversation_id).map(|entry| entry.clone())
    }

    /// Whether a response is currently streaming for this conversation.
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.inner.contains_key(conversation_id)
    }

    fn remove_if_owner(&self, conversation_id: &str, temp_id: &str) {
        self.inner
            .remove_if(conversation_id, |_, session| session.temp_id == temp_id);
    }
}

/// Ownership handle for one streaming session.
pub struct SessionGuard {
    sessions: StreamSessions,
    conversation_id: String,
    temp_id: String,
}

impl SessionGuard {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions
            .remove_if_owner(&self.conversation_id, &self.temp_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_append_snapshot() {
        let sessions = StreamSessions::new();
        let guard = sessions.begin("conv-1");
        assert!(sessions.is_active("conv-1"));

        sessions.append("conv-1", "Hel");
        sessions.append("conv-1", "lo");

        let snap = sessions.snapshot("conv-1").unwrap();
        assert_eq!(snap.temp_id, guard.temp_id());
        assert_eq!(snap.partial, "Hello");
    }

    #[test]
    fn test_drop_clears_session() {
        let sessions = StreamSessions::new();
        let guard = sessions.begin("conv-1");
        drop(guard);
        assert!(!sessions.is_active("conv-1"));
        assert!(sessions.snapshot("conv-1").is_none());
    }

    #[test]
    fn test_begin_replaces_stale_session() {
        let sessions = StreamSessions::new();
        let first = sessions.begin("conv-1");
        sessions.append("conv-1", "stale");

        let second = sessions.begin("conv-1");
        let snap = sessions.snapshot("conv-1").unwrap();
        assert_eq!(snap.temp_id, second.temp_id());
        assert!(snap.partial.is_empty());

        // The replaced guard must not tear down the newer session.
        drop(first);
        assert!(sessions.is_active("conv-1"));
        drop(second);
        assert!(!sessions.is_active("conv-1"));
    }

    #[test]
    fn test_append_without_session_is_noop() {
        let sessions = StreamSessions::new();
        sessions.append("conv-1", "orphan");
        assert!(sessions.snapshot("conv-1").is_none());
    }
}
