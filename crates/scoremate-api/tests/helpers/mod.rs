//! Test helpers: build AppState and router for integration tests.
//!
//! Everything runs against the in-memory repository and object store, so no
//! Docker is needed. Tasks are enqueued but never executed: there is no worker.

#![allow(dead_code)]

pub mod auth;

use axum_test::TestServer;
use scoremate_api::constants;
use scoremate_api::services::{ScoreLifecycle, UploadCoordinator};
use scoremate_api::setup::routes;
use scoremate_api::state::{AppState, DbState, ServiceState, StorageState, TaskState};
use scoremate_api::TaskQueue;
use scoremate_core::config::ScoremateConfig;
use scoremate_core::Config;
use scoremate_db::{InMemoryRepository, Repositories};
use scoremate_storage::{InMemoryStorage, Storage};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

/// Test application: the server plus handles on the backing stores.
pub struct TestApp {
    pub server: TestServer,
    pub repo: InMemoryRepository,
    pub storage: InMemoryStorage,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Reserve an upload and return the reservation id.
    pub async fn reserve(&self, token: &str, size_bytes: i64) -> Uuid {
        let response = self
            .server
            .post(&api_path("/files/upload-url"))
            .add_header("Authorization", auth::bearer(token))
            .json(&json!({
                "filename": "score.pdf",
                "size_bytes": size_bytes,
                "mime_type": "application/pdf"
            }))
            .await;
        assert_eq!(response.status_code(), 201, "{}", response.text());
        let body: Value = response.json();
        body["upload_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("upload_id in response")
    }

    /// Confirm a reservation and return the raw response.
    pub async fn confirm(&self, token: &str, upload_id: Uuid) -> axum_test::TestResponse {
        self.server
            .post(&api_path("/files/upload-confirm"))
            .add_header("Authorization", auth::bearer(token))
            .json(&json!({
                "upload_id": upload_id,
                "title": "Goldberg Variations",
                "composer": "J. S. Bach",
                "tags": ["baroque", "keyboard"]
            }))
            .await
    }

    /// Reserve and confirm in one go, returning the new score id.
    pub async fn upload_score(&self, token: &str, size_bytes: i64) -> Uuid {
        let upload_id = self.reserve(token, size_bytes).await;
        let response = self.confirm(token, upload_id).await;
        assert_eq!(response.status_code(), 200, "{}", response.text());
        let body: Value = response.json();
        body["score_id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("score_id in response")
    }

    pub async fn quota(&self, token: &str) -> Value {
        let response = self
            .server
            .get(&api_path("/quota"))
            .add_header("Authorization", auth::bearer(token))
            .await;
        assert_eq!(response.status_code(), 200);
        response.json()
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Setup with in-memory backends; `configure` may adjust limits before the
/// services are built.
pub async fn setup_test_app_with(configure: impl FnOnce(&mut ScoremateConfig)) -> TestApp {
    let mut inner = ScoremateConfig::in_memory(auth::TEST_JWT_SECRET);
    configure(&mut inner);
    let config = Config(Box::new(inner));
    config.validate().expect("test config is valid");

    let repo = InMemoryRepository::new();
    let repos = Repositories::in_memory(repo.clone());
    let storage = InMemoryStorage::new();
    let gateway: Arc<dyn Storage> = Arc::new(storage.clone());

    let task_queue = TaskQueue::new_no_worker(repos.tasks.clone(), config.worker().clone());
    let upload = config.upload().clone();
    let services = ServiceState {
        uploads: UploadCoordinator::new(
            &repos,
            gateway.clone(),
            task_queue.clone(),
            upload.clone(),
        ),
        scores: ScoreLifecycle::new(
            &repos,
            gateway.clone(),
            task_queue.clone(),
            upload.presigned_url_expiry_secs,
        ),
    };

    let state = Arc::new(AppState {
        db: DbState { pool: None, repos },
        storage: StorageState {
            storage: gateway,
            #[cfg(feature = "storage-local")]
            local: None,
        },
        tasks: TaskState {
            task_queue,
            dispatcher: None,
        },
        services,
        upload,
        is_production: false,
        config: config.clone(),
    });

    let router = routes::setup_routes(&config, state.clone())
        .await
        .expect("router builds");
    let server = TestServer::new(router).expect("test server starts");

    TestApp {
        server,
        repo,
        storage,
        state,
    }
}
