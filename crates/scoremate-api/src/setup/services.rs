//! Service construction: task dispatcher, worker pool and request-path services.

use crate::services::{ScoreLifecycle, UploadCoordinator};
use crate::state::{AppState, DbState, ServiceState, StorageState, TaskState};
use crate::task_handlers::{ProcessingContext, ScoreTaskDispatcher};
use anyhow::Result;
use scoremate_core::Config;
use scoremate_db::Repositories;
use scoremate_processing::{PdfInspector, PdftoppmRenderer, ThumbnailSpec};
use scoremate_worker::{TaskHandlerContext, TaskQueue};
use sqlx::PgPool;
use std::sync::Arc;

pub async fn initialize_services(
    config: &Config,
    pool: Option<PgPool>,
    repos: Repositories,
    storage: StorageState,
) -> Result<Arc<AppState>> {
    let render = config.render();
    let renderer = PdftoppmRenderer::new(
        render.pdftoppm_path.clone(),
        ThumbnailSpec {
            width: render.thumbnail_width,
            height: render.thumbnail_height,
            quality: render.thumbnail_quality,
        },
    );

    let dispatcher: Arc<dyn TaskHandlerContext> =
        Arc::new(ScoreTaskDispatcher::new(ProcessingContext {
            storage: storage.storage.clone(),
            scores: repos.scores.clone(),
            inspector: Arc::new(PdfInspector::new()),
            renderer: Arc::new(renderer),
        }));

    let worker_config = config.worker().clone();
    tracing::info!(
        max_workers = worker_config.max_workers,
        poll_interval_ms = worker_config.poll_interval_ms,
        max_retries = worker_config.max_retries,
        pdftoppm = %render.pdftoppm_path,
        "Starting task queue"
    );
    let task_queue = TaskQueue::new(
        repos.tasks.clone(),
        worker_config,
        Arc::downgrade(&dispatcher),
        pool.clone(),
        Some(repos.reservations.clone()),
    );

    let upload = config.upload().clone();
    let services = ServiceState {
        uploads: UploadCoordinator::new(
            &repos,
            storage.storage.clone(),
            task_queue.clone(),
            upload.clone(),
        ),
        scores: ScoreLifecycle::new(
            &repos,
            storage.storage.clone(),
            task_queue.clone(),
            upload.presigned_url_expiry_secs,
        ),
    };

    Ok(Arc::new(AppState {
        db: DbState { pool, repos },
        storage,
        tasks: TaskState {
            task_queue,
            dispatcher: Some(dispatcher),
        },
        services,
        upload,
        is_production: config.is_production(),
        config: config.clone(),
    }))
}
