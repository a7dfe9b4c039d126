use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scoremate_core::models::{DeleteScoreFilesPayload, Task};
use scoremate_storage::{keys, DeleteOutcome, Storage};
use serde_json::json;

use super::{payload, ProcessingContext, TaskHandler};

const DELETE_CONCURRENCY: usize = 8;

/// Removes the objects of a deleted score. Quota was already released with
/// the record, so this only has to converge; a partial failure retries the
/// whole task and already-deleted keys come back as not found.
pub struct CleanupTaskHandler;

#[async_trait]
impl TaskHandler for CleanupTaskHandler {
    #[tracing::instrument(skip(self, task, ctx), fields(task_id = %task.id, score_id = tracing::field::Empty))]
    async fn process(&self, task: &Task, ctx: &ProcessingContext) -> Result<serde_json::Value> {
        let payload: DeleteScoreFilesPayload = payload(task)?;
        tracing::Span::current().record("score_id", tracing::field::display(payload.score_id));

        let object_keys = keys::score_object_keys(
            payload.user_id,
            payload.score_id,
            &payload.original_key,
            payload.thumbnail_key.as_deref(),
            payload.pages,
        );

        let outcomes: Vec<(String, Result<DeleteOutcome, String>)> = stream::iter(object_keys)
            .map(|key| async move {
                let outcome = ctx.storage.delete(&key).await.map_err(|e| e.to_string());
                (key, outcome)
            })
            .buffer_unordered(DELETE_CONCURRENCY)
            .collect()
            .await;

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for (key, outcome) in outcomes {
            match outcome {
                Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::NotFound) => deleted.push(key),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to delete score object");
                    failed.push(key);
                }
            }
        }

        if !failed.is_empty() {
            anyhow::bail!(
                "Failed to delete {} of {} objects: {}",
                failed.len(),
                failed.len() + deleted.len(),
                failed.join(", ")
            );
        }

        tracing::info!(deleted = deleted.len(), "Score objects deleted");
        Ok(json!({
            "deleted": deleted.len(),
            "failed": failed.len(),
        }))
    }
}
