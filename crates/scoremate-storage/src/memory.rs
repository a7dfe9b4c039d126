use crate::traits::{validate_key, DeleteOutcome, SignedUrl, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Process-local object store.
///
/// Signing and deleting can be switched to fail so callers can exercise
/// their gateway error paths.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    fail_signing: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Place an object as if a client had uploaded it through a signed URL.
    pub fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredObject>> {
        // A poisoned map is still structurally valid.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn signed(&self, method: &str, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(StorageError::SigningFailed(
                "signing disabled for this store".to_string(),
            ));
        }
        Ok(format!(
            "memory://objects/{}?method={}&expires_in={}",
            key,
            method,
            expires_in.as_secs()
        ))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn sign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<SignedUrl> {
        let url = self.signed("PUT", key, expires_in)?;
        Ok(SignedUrl::put(url, content_type, expires_in))
    }

    async fn sign_get(&self, key: &str, expires_in: Duration) -> StorageResult<SignedUrl> {
        let url = self.signed("GET", key, expires_in)?;
        Ok(SignedUrl::get(url, expires_in))
    }

    async fn delete(&self, key: &str) -> StorageResult<DeleteOutcome> {
        validate_key(key)?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!(
                "delete of {} rejected by store",
                key
            )));
        }
        Ok(match self.lock().remove(key) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }

    async fn download(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        self.lock()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload_with_key(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        _cache_control: Option<&str>,
    ) -> StorageResult<()> {
        validate_key(key)?;
        self.put_object(key, data, content_type);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.lock().contains_key(key))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
