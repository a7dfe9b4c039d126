use crate::traits::{validate_key, DeleteOutcome, SignedUrl, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

type HmacSha256 = Hmac<Sha256>;

/// Local filesystem storage.
///
/// Signed URLs point at `base_url` (served by the API's local file routes)
/// and carry an HMAC over method, key and expiry.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    signing_key: Vec<u8>,
}

impl LocalStorage {
    /// * `base_path` - root directory for objects (e.g. "/var/lib/scoremate/objects")
    /// * `base_url` - URL prefix the objects are served under (e.g. "http://localhost:3000/storage")
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_key: impl Into<Vec<u8>>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            signing_key: signing_key.into(),
        })
    }

    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let path = self.base_path.join(key);
        if !path.starts_with(&self.base_path) {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }
        Ok(path)
    }

    fn mac(&self, method: &str, key: &str, expires_at: i64) -> StorageResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::ConfigError(format!("Invalid signing key: {}", e)))?;
        mac.update(method.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at.to_string().as_bytes());
        Ok(mac)
    }

    fn signed_url(
        &self,
        method: &str,
        key: &str,
        expires_in: Duration,
        extra_query: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        let expires_at = chrono::Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = hex::encode(self.mac(method, key, expires_at)?.finalize().into_bytes());
        Ok(format!(
            "{}/{}?expires={}&signature={}{}",
            self.base_url.trim_end_matches('/'),
            key,
            expires_at,
            signature,
            extra_query
        ))
    }

    /// Check a request against a URL produced by `sign_put`/`sign_get`.
    pub fn verify_signature(
        &self,
        method: &str,
        key: &str,
        expires_at: i64,
        signature: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        if chrono::Utc::now().timestamp() > expires_at {
            return Err(StorageError::InvalidSignature);
        }
        let provided = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;
        self.mac(method, key, expires_at)?
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn sign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<SignedUrl> {
        let extra = format!("&content_type={}", urlencoding::encode(content_type));
        let url = self.signed_url("PUT", key, expires_in, &extra)?;
        Ok(SignedUrl::put(url, content_type, expires_in))
    }

    async fn sign_get(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl> {
        let url = self.signed_url("GET", key, expires_in, "")?;
        Ok(SignedUrl::get(url, expires_in))
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteOutcome> {
        let path = self.key_to_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), key = %key, "Local storage delete successful");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn upload_with_key(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
        _cache_control: Option<&str>,
    ) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
