use anyhow::{Context, Result};
use async_trait::async_trait;
use scoremate_core::models::{ProcessPdfInfoPayload, ScoreInfoUpdate, Task};
use scoremate_db::ScoreStore;
use serde_json::json;

use super::{payload, ProcessingContext, TaskHandler};

const MAX_TITLE_CHARS: usize = 200;
const MAX_COMPOSER_CHARS: usize = 100;

fn truncate_chars(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}

/// Page count and Info-dictionary title/author for a freshly confirmed score.
pub struct PdfInfoTaskHandler;

#[async_trait]
impl TaskHandler for PdfInfoTaskHandler {
    #[tracing::instrument(skip(self, task, ctx), fields(task_id = %task.id, score_id = tracing::field::Empty))]
    async fn process(&self, task: &Task, ctx: &ProcessingContext) -> Result<serde_json::Value> {
        let payload: ProcessPdfInfoPayload = payload(task)?;
        tracing::Span::current().record("score_id", tracing::field::display(payload.score_id));

        let Some(score) = ctx.score(payload.score_id).await? else {
            tracing::info!("Score no longer exists, skipping PDF info");
            return Ok(json!({ "success": false, "reason": "score not found" }));
        };

        let data = ctx.load_original(&score).await?;
        let info = ctx
            .inspector
            .inspect(data)
            .await
            .context("Failed to inspect PDF")?;

        let update = ScoreInfoUpdate {
            pages: i32::try_from(info.page_count).unwrap_or(i32::MAX),
            title: info
                .title
                .as_deref()
                .map(|t| truncate_chars(t, MAX_TITLE_CHARS))
                .filter(|t| !t.is_empty()),
            composer: info
                .author
                .as_deref()
                .map(|a| truncate_chars(a, MAX_COMPOSER_CHARS))
                .filter(|a| !a.is_empty()),
        };

        let Some(updated) = ctx.scores.update_info(score.id, &update).await? else {
            tracing::info!("Score deleted while inspecting, dropping PDF info");
            return Ok(json!({ "success": false, "reason": "score not found" }));
        };

        tracing::info!(pages = update.pages, "PDF info recorded");

        Ok(json!({
            "success": true,
            "score_id": updated.id,
            "pages": update.pages,
            "title": updated.title,
            "composer": updated.composer,
        }))
    }
}
