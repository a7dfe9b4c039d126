//! Background task handlers.
//!
//! [`ScoreTaskDispatcher`] is what the worker pool calls; it routes each task to
//! the handler for its type. Handlers must be safe to run more than once for
//! the same payload.

mod cleanup_handler;
mod pdf_info_handler;
mod thumbnail_handler;

use anyhow::Result;
use async_trait::async_trait;
use scoremate_core::models::{Score, Task, TaskPayload, TaskType};
use scoremate_core::TaskError;
use scoremate_db::ScoreStore;
use scoremate_processing::{DocumentInspector, PageRenderer};
use scoremate_storage::{Storage, StorageError};
use scoremate_worker::TaskHandlerContext;
use std::sync::Arc;
use uuid::Uuid;

pub use cleanup_handler::CleanupTaskHandler;
pub use pdf_info_handler::PdfInfoTaskHandler;
pub use thumbnail_handler::{PageThumbnailsTaskHandler, ThumbnailTaskHandler};

/// Everything a handler may touch.
#[derive(Clone)]
pub struct ProcessingContext {
    pub storage: Arc<dyn Storage>,
    pub scores: Arc<dyn ScoreStore>,
    pub inspector: Arc<dyn DocumentInspector>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl ProcessingContext {
    /// Read the original PDF of `score`. A missing object will not appear on
    /// retry, so it fails the task outright.
    async fn load_original(&self, score: &Score) -> Result<Arc<Vec<u8>>> {
        match self.storage.download(&score.s3_key).await {
            Ok(data) => Ok(Arc::new(data)),
            Err(StorageError::NotFound(key)) => Err(TaskError::unrecoverable(anyhow::anyhow!(
                "Original object {} is missing",
                key
            ))
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn score(&self, score_id: Uuid) -> Result<Option<Score>> {
        self.scores.get_by_id(score_id).await
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task, ctx: &ProcessingContext) -> Result<serde_json::Value>;
}

/// Decode the task payload; a payload that does not parse never will.
pub(crate) fn payload<P: TaskPayload>(task: &Task) -> Result<P> {
    task.try_payload_as::<P>().map_err(|e| {
        TaskError::unrecoverable(anyhow::anyhow!(
            "Invalid {} payload: {}",
            task.task_type,
            e
        ))
        .into()
    })
}

pub struct ScoreTaskDispatcher {
    ctx: ProcessingContext,
}

impl ScoreTaskDispatcher {
    pub fn new(ctx: ProcessingContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl TaskHandlerContext for ScoreTaskDispatcher {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        let handler: &dyn TaskHandler = match task.task_type {
            TaskType::ProcessPdfInfo => &PdfInfoTaskHandler,
            TaskType::GenerateThumbnail => &ThumbnailTaskHandler,
            TaskType::GenerateAllPageThumbnails => &PageThumbnailsTaskHandler,
            TaskType::DeleteScoreFiles => &CleanupTaskHandler,
        };
        handler.process(task, &self.ctx).await
    }
}
