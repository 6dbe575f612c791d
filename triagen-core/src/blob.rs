//! Blob store contract for incident attachments.
//!
//! The engine only needs presigned URL issuance and delete-by-key; uploads
//! and downloads go straight between the client and the blob store.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for blob store operations
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for blob store operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Shared reference to a blob store implementation
pub type SharedBlobStore = Arc<dyn BlobStore>;

/// Time-limited URL granting one operation on one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// URL the client PUTs the object to
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> BlobResult<PresignedUrl>;

    /// URL the client GETs the object from (served as an attachment)
    async fn presign_download(&self, key: &str, ttl: Duration) -> BlobResult<PresignedUrl>;

    /// Remove an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// In-process blob store that tracks which keys exist
pub struct MemoryBlobStore {
    bucket: String,
    objects: RwLock<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashSet::new()),
        }
    }

    pub fn shared(self) -> SharedBlobStore {
        Arc::new(self)
    }

    /// Record an object as uploaded (stands in for the client's PUT)
    pub fn put(&self, key: &str) -> BlobResult<()> {
        self.objects
            .write()
            .map_err(|_| BlobError::LockPoisoned)?
            .insert(key.to_string());
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains(key))
            .unwrap_or(false)
    }

    fn sign(&self, key: &str, op: &str, ttl: Duration) -> BlobResult<PresignedUrl> {
        if key.is_empty() || key.starts_with('/') {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(PresignedUrl {
            url: format!(
                "memory://{}/{}?op={}&expires={}&sig={}",
                self.bucket,
                key,
                op,
                expires_at.timestamp(),
                Uuid::new_v4().simple()
            ),
            key: key.to_string(),
            expires_at,
        })
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn presign_upload(
        &self,
        key: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> BlobResult<PresignedUrl> {
        self.sign(key, "put", ttl)
    }

    async fn presign_download(&self, key: &str, ttl: Duration) -> BlobResult<PresignedUrl> {
        self.sign(key, "get", ttl)
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.objects
            .write()
            .map_err(|_| BlobError::LockPoisoned)?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_presigned_urls_expire_after_ttl() {
        let blobs = MemoryBlobStore::new("evidence");
        let before = Utc::now();
        let url = blobs
            .presign_upload("inc-1/abc-log.txt", "text/plain", Duration::from_secs(900))
            .await
            .unwrap();

        assert!(url.url.starts_with("memory://evidence/inc-1/abc-log.txt?op=put"));
        assert!(url.expires_at >= before + chrono::Duration::seconds(900));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let blobs = MemoryBlobStore::new("evidence");
        blobs.put("inc-1/a").unwrap();
        blobs.delete("inc-1/a").await.unwrap();
        blobs.delete("inc-1/a").await.unwrap();
        assert!(!blobs.contains("inc-1/a"));
    }

    #[tokio::test]
    async fn test_rejects_empty_key() {
        let blobs = MemoryBlobStore::new("evidence");
        let err = blobs
            .presign_download("", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));
    }
}
