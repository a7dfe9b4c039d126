//! Object storage gateway trait

use crate::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("URL signing failed: {0}")]
    SigningFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid or expired signature")]
    InvalidSignature,

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A time-limited URL permitting one direct operation against one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    /// HTTP method the URL is valid for ("PUT" or "GET")
    pub method: String,
    /// Headers the client must send with the request
    pub headers: HashMap<String, String>,
    pub expires_in: Duration,
}

impl SignedUrl {
    pub fn get(url: String, expires_in: Duration) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            expires_in,
        }
    }

    pub fn put(url: String, content_type: &str, expires_in: Duration) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());
        Self {
            url,
            method: "PUT".to_string(),
            headers,
            expires_in,
        }
    }
}

/// Result of a delete. Deleting a missing object is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Object storage gateway.
///
/// The upload path only ever signs URLs: file bytes go from the client to the
/// bucket directly. `download` and `upload_with_key` exist for the background
/// workers that read originals and write thumbnails.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Sign a PUT for `key`; the client must send the returned headers.
    async fn sign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<SignedUrl>;

    /// Sign a GET for `key`. Signing does not check that the object exists.
    async fn sign_get(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl>;

    async fn delete(&self, key: &str) -> StorageResult<DeleteOutcome>;

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Write `data` to `key`, replacing any existing object.
    async fn upload_with_key(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        cache_control: Option<&str>,
    ) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    fn backend_type(&self) -> StorageBackend;
}

/// Reject keys that could escape their namespace.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid characters: {}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("u/uploads/x/original.pdf").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/key").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn put_url_requires_content_type_header() {
        let signed = SignedUrl::put(
            "https://bucket/key".to_string(),
            "application/pdf",
            Duration::from_secs(60),
        );
        assert_eq!(signed.method, "PUT");
        assert_eq!(
            signed.headers.get("Content-Type").map(String::as_str),
            Some("application/pdf")
        );
    }
}
