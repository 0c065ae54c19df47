//! Storage for uploaded attachments.
//!
//! An upload yields a `(filename, url)` pair; the client then sends it as an
//! attachment message. The hub never reads the blob itself.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request had no file or an empty one.
    #[error("No file uploaded")]
    Empty,

    /// The file exceeds the size limit.
    #[error("File size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// The stored name is not a plain file name.
    #[error("Invalid file name")]
    InvalidName,

    /// Storage failure.
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an uploaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredBlob {
    /// Public link to the file.
    pub url: String,
    /// The name the file was uploaded under.
    pub filename: String,
}

/// Stores uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` uploaded as `filename`.
    async fn put(&self, filename: &str, data: Bytes) -> Result<StoredBlob, UploadError>;

    /// Fetch a stored file by the key at the end of its URL.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, UploadError>;
}

/// Keep only characters that are safe in a file name.
fn sanitize(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Files in a local directory, served back under `{base_url}/files/{key}`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
    base_url: String,
    max_bytes: usize,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>, max_bytes: usize) -> Self {
        let dir = dir.into();
        info!("Storing uploads in {}", dir.display());
        Self {
            dir,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, filename: &str, data: Bytes) -> Result<StoredBlob, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let key = format!("{}-{}", Uuid::new_v4().simple(), sanitize(filename));
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&key), &data).await?;

        debug!(key = %key, bytes = data.len(), "Stored upload");
        Ok(StoredBlob {
            url: format!("{}/files/{}", self.base_url, key),
            filename: filename.to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, UploadError> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(UploadError::InvalidName);
        }

        match tokio::fs::read(self.dir.join(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("cat.png"), "cat.png");
        assert_eq!(sanitize("../../etc/passwd"), "passwd");
        assert_eq!(sanitize("C:\\docs\\my file.txt"), "my_file.txt");
        assert_eq!(sanitize(".hidden"), "hidden");
        assert_eq!(sanitize(""), "file");
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://localhost:8080/", 1024);

        let blob = store
            .put("cat.png", Bytes::from_static(b"meow"))
            .await
            .unwrap();
        assert_eq!(blob.filename, "cat.png");
        assert!(blob.url.starts_with("http://localhost:8080/files/"));
        assert!(blob.url.ends_with("-cat.png"));

        let key = blob.url.rsplit('/').next().unwrap();
        let data = store.get(key).await.unwrap().unwrap();
        assert_eq!(&data[..], b"meow");
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://localhost", 3);

        assert!(matches!(
            store.put("a.txt", Bytes::new()).await,
            Err(UploadError::Empty)
        ));
        assert!(matches!(
            store.put("a.txt", Bytes::from_static(b"toolong")).await,
            Err(UploadError::TooLarge { size: 7, max: 3 })
        ));
    }

    #[tokio::test]
    async fn test_get_missing_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://localhost", 1024);

        assert!(store.get("nope.txt").await.unwrap().is_none());
        assert!(matches!(
            store.get("../secret").await,
            Err(UploadError::InvalidName)
        ));
    }
}
