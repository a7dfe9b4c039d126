//! Object storage setup

use crate::state::StorageState;
use anyhow::{Context, Result};
use scoremate_core::{Config, StorageBackend};
#[cfg(feature = "storage-local")]
use scoremate_storage::LocalStorage;
use scoremate_storage::{create_storage, Storage};
#[cfg(feature = "storage-local")]
use std::sync::Arc;

/// Build the configured backend. The local backend is also kept by its
/// concrete type because this process serves its signed URLs.
pub async fn setup_storage(config: &Config) -> Result<StorageState> {
    let backend = config.storage_backend();

    #[cfg(feature = "storage-local")]
    if backend == StorageBackend::Local {
        let base_path = config
            .local_storage_path()
            .context("LOCAL_STORAGE_PATH not configured")?;
        let base_url = config
            .local_storage_base_url()
            .context("LOCAL_STORAGE_BASE_URL not configured")?;
        let local = Arc::new(
            LocalStorage::new(base_path, base_url.to_string(), config.jwt_secret().as_bytes())
                .await
                .context("Failed to initialize local storage")?,
        );
        tracing::info!(path = %base_path, "Local storage initialized");
        return Ok(StorageState {
            storage: local.clone(),
            local: Some(local),
        });
    }

    let storage = create_storage(config)
        .await
        .with_context(|| format!("Failed to initialize {} storage", backend))?;
    if storage.backend_type() == StorageBackend::Memory {
        tracing::warn!("Using in-memory object storage; objects are lost on restart");
    }
    tracing::info!(backend = %storage.backend_type(), "Storage initialized");

    Ok(StorageState {
        storage,
        #[cfg(feature = "storage-local")]
        local: None,
    })
}
