//! SQLite-backed message log.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::db::LogDb;
use super::observer::{ObserverRegistry, Subscription};
use super::{LogError, LogObserver, LogResult, MessageLog};
use crate::models::{Attachment, Conversation, Message, MessagePatch, MessageRole, NewMessage};

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    pinned: i64,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    role: String,
    content: String,
    created_at: i64,
    updated_at: Option<i64>,
}

#[derive(Debug, FromRow)]
struct AttachmentRow {
    message_id: String,
    url: String,
    name: String,
    media_type: String,
    size_bytes: i64,
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: row.id,
            title: row.title,
            pinned: row.pinned != 0,
            created_at: millis_to_datetime(row.created_at),
        })
    }
}

impl MessageRow {
    fn into_message(self, attachments: Vec<Attachment>) -> Result<Message> {
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| anyhow!(e))
            .context("parsing message role")?;
        Ok(Message {
            id: self.id,
            role,
            content: self.content,
            created_at: millis_to_datetime(self.created_at),
            updated_at: self.updated_at.map(millis_to_datetime),
            attachments,
            pending: false,
        })
    }
}

/// Durable [`MessageLog`] over SQLite.
#[derive(Clone)]
pub struct SqliteLog {
    db: LogDb,
    observers: ObserverRegistry,
}

impl SqliteLog {
    pub fn new(db: LogDb) -> Self {
        Self {
            db,
            observers: ObserverRegistry::new(),
        }
    }

    async fn conversation_exists(&self, conversation_id: &str) -> LogResult<()> {
        let found =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_one(self.db.pool())
                .await
                .context("checking conversation")?;
        if found == 0 {
            return Err(LogError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> LogResult<Vec<Message>> {
        self.conversation_exists(conversation_id).await?;

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, role, content, created_at, updated_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(self.db.pool())
        .await
        .context("fetching messages")?;

        let attachment_rows = sqlx::query_as::<_, AttachmentRow>(
            r#"
            SELECT a.message_id, a.url, a.name, a.media_type, a.size_bytes
            FROM attachments a
            JOIN messages m ON m.id = a.message_id
            WHERE m.conversation_id = ?
            ORDER BY a.position ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(self.db.pool())
        .await
        .context("fetching attachments")?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let attachments = attachment_rows
                .iter()
                .filter(|a| a.message_id == row.id)
                .map(|a| Attachment {
                    url: a.url.clone(),
                    name: a.name.clone(),
                    media_type: a.media_type.clone(),
                    size_bytes: a.size_bytes as u64,
                })
                .collect();
            messages.push(row.into_message(attachments)?);
        }
        Ok(messages)
    }

    async fn notify(&self, conversation_id: &str) {
        if self.observers.observer_count(conversation_id) == 0 {
            return;
        }
        match self.fetch_messages(conversation_id).await {
            Ok(messages) => self.observers.notify(conversation_id, &messages),
            // A deleted conversation notifies with an empty list.
            Err(LogError::ConversationNotFound(_)) => {
                self.observers.notify(conversation_id, &[]);
            }
            Err(err) => {
                tracing::warn!("failed to load messages for notification: {err}");
            }
        }
    }
}

#[async_trait]
impl MessageLog for SqliteLog {
    async fn create_conversation(&self, title: &str) -> LogResult<Conversation> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();

        sqlx::query("INSERT INTO conversations (id, title, pinned, created_at) VALUES (?, ?, 0, ?)")
            .bind(&id)
            .bind(title)
            .bind(created_at)
            .execute(self.db.pool())
            .await
            .context("inserting conversation")?;

        Ok(Conversation {
            id,
            title: title.to_string(),
            pinned: false,
            created_at: millis_to_datetime(created_at),
        })
    }

    async fn list_conversations(&self) -> LogResult<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, title, pinned, created_at FROM conversations ORDER BY pinned DESC, created_at DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .context("listing conversations")?;

        rows.into_iter()
            .map(|row| row.try_into().map_err(LogError::Storage))
            .collect()
    }

    async fn rename_conversation(&self, conversation_id: &str, title: &str) -> LogResult<()> {
        let result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(title)
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
            .context("renaming conversation")?;
        if result.rows_affected() == 0 {
            return Err(LogError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    async fn set_pinned(&self, conversation_id: &str, pinned: bool) -> LogResult<()> {
        let result = sqlx::query("UPDATE conversations SET pinned = ? WHERE id = ?")
            .bind(pinned as i64)
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
            .context("updating pinned flag")?;
        if result.rows_affected() == 0 {
            return Err(LogError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> LogResult<()> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
            .context("deleting conversation")?;
        if result.rows_affected() == 0 {
            return Err(LogError::ConversationNotFound(conversation_id.to_string()));
        }
        self.notify(conversation_id).await;
        Ok(())
    }

    async fn append(&self, conversation_id: &str, message: NewMessage) -> LogResult<Message> {
        self.conversation_exists(conversation_id).await?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();
        let role = message.role.to_string();

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .context("starting append transaction")?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(&role)
        .bind(&message.content)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("inserting message")?;

        for (position, attachment) in message.attachments.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO attachments (message_id, url, name, media_type, size_bytes, position)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&attachment.url)
            .bind(&attachment.name)
            .bind(&attachment.media_type)
            .bind(attachment.size_bytes as i64)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .context("inserting attachment")?;
        }

        tx.commit().await.context("committing append")?;

        let committed = Message {
            id,
            role: message.role,
            content: message.content,
            created_at: millis_to_datetime(created_at),
            updated_at: None,
            attachments: message.attachments,
            pending: false,
        };
        self.notify(conversation_id).await;
        Ok(committed)
    }

    async fn update(
        &self,
        conversation_id: &str,
        message_id: &str,
        patch: MessagePatch,
    ) -> LogResult<()> {
        let updated_at = Utc::now().timestamp_millis();
        let result = if let Some(content) = patch.content {
            sqlx::query(
                "UPDATE messages SET content = ?, updated_at = ? WHERE id = ? AND conversation_id = ?",
            )
            .bind(content)
            .bind(updated_at)
            .bind(message_id)
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
        } else {
            sqlx::query(
                "UPDATE messages SET updated_at = ? WHERE id = ? AND conversation_id = ?",
            )
            .bind(updated_at)
            .bind(message_id)
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
        }
        .context("updating message")?;

        if result.rows_affected() == 0 {
            return Err(LogError::MessageNotFound(message_id.to_string()));
        }
        self.notify(conversation_id).await;
        Ok(())
    }

    async fn delete(&self, conversation_id: &str, message_id: &str) -> LogResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ? AND conversation_id = ?")
            .bind(message_id)
            .bind(conversation_id)
            .execute(self.db.pool())
            .await
            .context("deleting message")?;
        if result.rows_affected() == 0 {
            return Err(LogError::MessageNotFound(message_id.to_string()));
        }
        self.notify(conversation_id).await;
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> LogResult<Vec<Message>> {
        self.fetch_messages(conversation_id).await
    }

    async fn recent(&self, conversation_id: &str, limit: usize) -> LogResult<Vec<Message>> {
        let mut messages = self.fetch_messages(conversation_id).await?;
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    fn subscribe(&self, conversation_id: &str, observer: Box<LogObserver>) -> Subscription {
        self.observers.register(conversation_id, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteLog) {
        let temp = TempDir::new().unwrap();
        let db = LogDb::open(&temp.path().join("log.db")).await.unwrap();
        (temp, SqliteLog::new(db))
    }

    #[tokio::test]
    async fn test_message_round_trip_with_attachments() {
        let (_temp, log) = setup().await;
        let conv = log.create_conversation("Test").await.unwrap();

        let attachment = Attachment {
            url: "/blobs/c/1_photo.png".to_string(),
            name: "photo.png".to_string(),
            media_type: "image/png".to_string(),
            size_bytes: 1234,
        };
        let committed = log
            .append(
                &conv.id,
                NewMessage::user("look at this").with_attachments(vec![attachment.clone()]),
            )
            .await
            .unwrap();

        let messages = log.messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, committed.id);
        assert_eq!(messages[0].attachments, vec![attachment]);
    }

    #[tokio::test]
    async fn test_ordering_survives_same_millisecond() {
        let (_temp, log) = setup().await;
        let conv = log.create_conversation("Test").await.unwrap();

        for i in 0..8 {
            log.append(&conv.id, NewMessage::user(format!("m{}", i)))
                .await
                .unwrap();
        }

        let contents: Vec<String> = log
            .messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (0..8).map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades_messages() {
        let (_temp, log) = setup().await;
        let conv = log.create_conversation("Test").await.unwrap();
        log.append(&conv.id, NewMessage::user("one")).await.unwrap();

        log.delete_conversation(&conv.id).await.unwrap();

        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
                .fetch_one(log.db.pool())
                .await
                .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_subscription_notified_on_append() {
        let (_temp, log) = setup().await;
        let conv = log.create_conversation("Test").await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = log.subscribe(
            &conv.id,
            Box::new(move |msgs| seen_clone.lock().unwrap().push(msgs.len())),
        );

        log.append(&conv.id, NewMessage::user("one")).await.unwrap();
        log.append(&conv.id, NewMessage::assistant("two"))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_update_patches_content() {
        let (_temp, log) = setup().await;
        let conv = log.create_conversation("Test").await.unwrap();
        let msg = log.append(&conv.id, NewMessage::user("old")).await.unwrap();

        log.update(&conv.id, &msg.id, MessagePatch::content("new"))
            .await
            .unwrap();

        let messages = log.messages(&conv.id).await.unwrap();
        assert_eq!(messages[0].content, "new");
        assert!(messages[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_rename_and_pin() {
        let (_temp, log) = setup().await;
        let a = log.create_conversation("A").await.unwrap();
        let _b = log.create_conversation("B").await.unwrap();

        log.rename_conversation(&a.id, "Renamed").await.unwrap();
        log.set_pinned(&a.id, true).await.unwrap();

        let list = log.list_conversations().await.unwrap();
        assert_eq!(list[0].id, a.id);
        assert_eq!(list[0].title, "Renamed");
        assert!(list[0].pinned);
    }
}
