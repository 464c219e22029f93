//! In-memory message log.
//!
//! Keeps ordered message vectors per conversation. Used by tests and by
//! embedded callers that do not need durability.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::observer::{ObserverRegistry, Subscription};
use super::{LogError, LogObserver, LogResult, MessageLog};
use crate::models::{Conversation, Message, MessagePatch, NewMessage};

struct ConversationState {
    conversation: Conversation,
    messages: Vec<Message>,
}

/// In-process [`MessageLog`] implementation.
#[derive(Default)]
pub struct MemoryLog {
    conversations: RwLock<HashMap<String, ConversationState>>,
    observers: ObserverRegistry,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, conversation_id: &str) -> LogResult<Vec<Message>> {
        let guard = self.conversations.read().await;
        let state = guard
            .get(conversation_id)
            .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
        Ok(state.messages.clone())
    }

    async fn notify(&self, conversation_id: &str) {
        if let Ok(messages) = self.snapshot(conversation_id).await {
            self.observers.notify(conversation_id, &messages);
        }
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn create_conversation(&self, title: &str) -> LogResult<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
            pinned: false,
        };
        let mut guard = self.conversations.write().await;
        guard.insert(
            conversation.id.clone(),
            ConversationState {
                conversation: conversation.clone(),
                messages: Vec::new(),
            },
        );
        Ok(conversation)
    }

    async fn list_conversations(&self) -> LogResult<Vec<Conversation>> {
        let guard = self.conversations.read().await;
        let mut conversations: Vec<Conversation> = guard
            .values()
            .map(|state| state.conversation.clone())
            .collect();
        conversations.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(conversations)
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> LogResult<()> {
        let mut guard = self.conversations.write().await;
        let state = guard
            .get_mut(conversation_id)
            .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
        state.conversation.title = title.to_string();
        Ok(())
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> LogResult<()> {
        let mut guard = self.conversations.write().await;
        let state = guard
            .get_mut(conversation_id)
            .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
        state.conversation.pinned = pinned;
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> LogResult<()> {
        let mut guard = self.conversations.write().await;
        guard
            .remove(conversation_id)
            .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
        drop(guard);
        self.observers.notify(conversation_id, &[]);
        Ok(())
    }

    async fn append(&self, conversation_id: &str, message: NewMessage) -> LogResult<Message> {
        let committed = Message {
            id: Uuid::new_v4().to_string(),
            role: message.role,
            content: message.content,
            created_at: Utc::now(),
            updated_at: None,
            attachments: message.attachments,
            pending: false,
        };
        {
            let mut guard = self.conversations.write().await;
            let state = guard
                .get_mut(conversation_id)
                .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
            state.messages.push(committed.clone());
        }
        self.notify(conversation_id).await;
        Ok(committed)
    }

    async fn update(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> LogResult<()> {
        {
            let mut guard = self.conversations.write().await;
            let state = guard
                .get_mut(conversation_id)
                .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| LogError::MessageNotFound(message_id.to_string()))?;
            if let Some(content) = patch.content {
                message.content = content;
            }
            message.updated_at = Some(Utc::now());
        }
        self.notify(conversation_id).await;
        Ok(())
    }

    async fn delete(&self, conversation_id: &str, message_id: &str) -> LogResult<()> {
        {
            let mut guard = self.conversations.write().await;
            let state = guard
                .get_mut(conversation_id)
                .ok_or_else(|| LogError::ConversationNotFound(conversation_id.to_string()))?;
            let before = state.messages.len();
            state.messages.retain(|m| m.id != message_id);
            if state.messages.len() == before {
                return Err(LogError::MessageNotFound(message_id.to_string()));
            }
        }
        self.notify(conversation_id).await;
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> LogResult<Vec<Message>> {
        self.snapshot(conversation_id).await
    }

    async fn recent(&self, conversation_id: &str, limit: usize) -> LogResult<Vec<Message>> {
        let mut messages = self.snapshot(conversation_id).await?;
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    fn subscribe(&self, conversation_id: &str, observer: Box<LogObserver>) -> Subscription {
        self.observers.register(conversation_id, observer)
    }
}
