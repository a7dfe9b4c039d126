//! Dispatch seam between the queue and the task handlers.
//!
//! The API provides the implementation; the queue only holds a weak
//! reference so dropping the application tears the handlers down.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use scoremate_core::models::Task;

#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Run the handler for `task.task_type` and return the result recorded on the task.
    ///
    /// Errors wrapped in `TaskError::unrecoverable` fail the task immediately;
    /// any other error is retried with backoff.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;
}
