//! Application state and sub-state extractors.
//!
//! Handlers take `State<Arc<AppState>>`; the local object routes only need
//! the storage sub-state and extract it through `FromRef`.

use scoremate_core::config::UploadConfig;
use scoremate_core::Config;
use scoremate_db::Repositories;
use scoremate_storage::Storage;
#[cfg(feature = "storage-local")]
use scoremate_storage::LocalStorage;
use scoremate_worker::{TaskHandlerContext, TaskQueue};
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{ScoreLifecycle, UploadCoordinator};

// ----- Sub-state types -----

/// Persistence: the pool (absent with the in-memory backend) and the repositories.
#[derive(Clone)]
pub struct DbState {
    pub pool: Option<PgPool>,
    pub repos: Repositories,
}

/// Object storage gateway. `local` is set only for the filesystem backend,
/// whose signed URLs are served by this process.
#[derive(Clone)]
pub struct StorageState {
    pub storage: Arc<dyn Storage>,
    #[cfg(feature = "storage-local")]
    pub local: Option<Arc<LocalStorage>>,
}

/// The queue handle, and the dispatcher its workers hold weakly. `None` when
/// this process only enqueues.
#[derive(Clone)]
pub struct TaskState {
    pub task_queue: TaskQueue,
    pub dispatcher: Option<Arc<dyn TaskHandlerContext>>,
}

/// Request-path services built on top of the repositories and the gateway.
#[derive(Clone)]
pub struct ServiceState {
    pub uploads: UploadCoordinator,
    pub scores: ScoreLifecycle,
}

// ----- AppState -----

#[derive(Clone)]
pub struct AppState {
    pub db: DbState,
    pub storage: StorageState,
    pub tasks: TaskState,
    pub services: ServiceState,
    pub upload: UploadConfig,
    pub config: Config,
    pub is_production: bool,
}

// ----- FromRef for sub-state extraction -----

impl axum::extract::FromRef<Arc<AppState>> for StorageState {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.storage.clone()
    }
}

fn _assert_app_state_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<AppState>();
    assert_sync::<AppState>();
}
