//! Blob store collaborator.
//!
//! Attachments are uploaded before the owning message is committed; the
//! store returns a retrievable URL per object. The filesystem
//! implementation writes under a root directory the relay binary serves
//! at `/blobs/`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::Attachment;

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Failed to store blob {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Content-addressable file storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store one object and return its attachment record. The declared
    /// media type is taken as-is when present; otherwise it is guessed
    /// from the filename.
    async fn put(
        &self,
        conversation_id: &str,
        filename: &str,
        media_type: Option<&str>,
        bytes: &[u8],
    ) -> BlobResult<Attachment>;
}

fn resolve_media_type(filename: &str, declared: Option<&str>) -> String {
    match declared {
        Some(media_type) if !media_type.is_empty() => media_type.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Timestamp-prefixed object name, mirroring how uploads are keyed so two
/// files with the same name never collide.
fn object_name(filename: &str) -> String {
    format!("{}_{}", Utc::now().timestamp_millis(), filename)
}

/// Filesystem-backed blob store.
pub struct FsBlobStore {
    root: PathBuf,
    /// URL prefix under which the root is served (e.g. "/blobs").
    url_prefix: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        conversation_id: &str,
        filename: &str,
        media_type: Option<&str>,
        bytes: &[u8],
    ) -> BlobResult<Attachment> {
        let io_err = |source| BlobError::Io {
            name: filename.to_string(),
            source,
        };

        let object = object_name(filename);
        let dir = self.root.join(conversation_id);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        tokio::fs::write(dir.join(&object), bytes)
            .await
            .map_err(io_err)?;

        Ok(Attachment {
            url: format!("{}/{}/{}", self.url_prefix, conversation_id, object),
            name: filename.to_string(),
            media_type: resolve_media_type(filename, media_type),
            size_bytes: bytes.len() as u64,
        })
    }
}

/// In-memory blob store for tests and embedded use.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    /// When set, every `put` fails. Lets tests exercise the abort-turn path.
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        conversation_id: &str,
        filename: &str,
        media_type: Option<&str>,
        bytes: &[u8],
    ) -> BlobResult<Attachment> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(BlobError::Io {
                name: filename.to_string(),
                source: std::io::Error::other("upload rejected"),
            });
        }

        let object = object_name(filename);
        let url = format!("memory://{}/{}", conversation_id, object);
        self.objects
            .lock()
            .await
            .push((url.clone(), bytes.to_vec()));

        Ok(Attachment {
            url,
            name: filename.to_string(),
            media_type: resolve_media_type(filename, media_type),
            size_bytes: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_writes_and_links() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path(), "/blobs");

        let attachment = store
            .put("conv-1", "notes.txt", Some("text/plain"), b"hello")
            .await
            .unwrap();

        assert!(attachment.url.starts_with("/blobs/conv-1/"));
        assert!(attachment.url.ends_with("_notes.txt"));
        assert_eq!(attachment.media_type, "text/plain");
        assert_eq!(attachment.size_bytes, 5);

        let object = attachment.url.rsplit('/').next().unwrap();
        let stored = std::fs::read(temp.path().join("conv-1").join(object)).unwrap();
        assert_eq!(stored, b"hello");
    }

    #[tokio::test]
    async fn test_media_type_guessed_when_missing() {
        let store = MemoryBlobStore::new();
        let attachment = store.put("c", "photo.png", None, &[0u8; 4]).await.unwrap();
        assert_eq!(attachment.media_type, "image/png");

        let attachment = store.put("c", "mystery.bin", None, &[0u8; 4]).await.unwrap();
        assert_eq!(attachment.media_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_failing_store_reports_error() {
        let store = MemoryBlobStore::new();
        store.fail_uploads(true);
        assert!(store.put("c", "a.txt", None, b"x").await.is_err());
        assert_eq!(store.object_count().await, 0);
    }
}
