use anyhow::{Context, Result};
use async_trait::async_trait;
use scoremate_core::models::{
    GenerateAllPageThumbnailsPayload, GenerateThumbnailPayload, Score, ScoreInfoUpdate, Task,
};
use scoremate_core::TaskError;
use scoremate_db::ScoreStore;
use scoremate_processing::thumbnail::THUMBNAIL_CONTENT_TYPE;
use scoremate_storage::{keys, Storage};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{payload, ProcessingContext, TaskHandler};

const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";

/// Objects written for one rendered page.
struct RenderedPage {
    key: String,
    written: Vec<String>,
}

/// Render `page` and write it to its key. Page 1 also becomes the cover.
/// Re-running simply overwrites the objects.
async fn render_page(
    ctx: &ProcessingContext,
    score: &Score,
    pdf: Arc<Vec<u8>>,
    page: i32,
) -> Result<RenderedPage> {
    let page_number = u32::try_from(page).context("Page number must be positive")?;
    let jpeg = ctx
        .renderer
        .render_thumbnail(pdf, page_number)
        .await
        .with_context(|| format!("Failed to render page {}", page))?;

    let key = if page == 1 {
        keys::cover_thumbnail_key(score.user_id, score.id)
    } else {
        keys::page_thumbnail_key(score.user_id, score.id, page)
    };

    ctx.storage
        .upload_with_key(
            &key,
            jpeg.clone(),
            THUMBNAIL_CONTENT_TYPE,
            Some(THUMBNAIL_CACHE_CONTROL),
        )
        .await
        .with_context(|| format!("Failed to store thumbnail {}", key))?;
    let mut written = vec![key.clone()];

    if page == 1 {
        // The cover is also readable through the page layout.
        let page_key = keys::page_thumbnail_key(score.user_id, score.id, 1);
        ctx.storage
            .upload_with_key(
                &page_key,
                jpeg,
                THUMBNAIL_CONTENT_TYPE,
                Some(THUMBNAIL_CACHE_CONTROL),
            )
            .await
            .with_context(|| format!("Failed to store thumbnail {}", page_key))?;
        written.push(page_key);
    }

    Ok(RenderedPage { key, written })
}

/// Record the cover if page 1 was rendered, then make sure the score still
/// exists. Returns false once the score is gone, after deleting `written`:
/// the cleanup task was built from the deleted record and will not see them.
async fn keep_or_discard(
    ctx: &ProcessingContext,
    score_id: Uuid,
    cover: Option<&str>,
    written: &[String],
) -> Result<bool> {
    let exists = match cover {
        Some(key) => ctx.scores.set_thumbnail_key(score_id, key).await?,
        None => ctx.score(score_id).await?.is_some(),
    };
    if exists {
        return Ok(true);
    }

    tracing::info!(
        score_id = %score_id,
        objects = written.len(),
        "Score deleted while rendering, discarding thumbnails"
    );
    for key in written {
        if let Err(e) = ctx.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to discard thumbnail");
        }
    }
    Ok(false)
}

/// Persist the page count before any page object is written, so a later
/// delete knows every key to remove. `None` means the score is gone.
async fn record_page_count(
    ctx: &ProcessingContext,
    score: &Score,
    pdf: Arc<Vec<u8>>,
) -> Result<Option<i32>> {
    let info = ctx
        .inspector
        .inspect(pdf)
        .await
        .context("Failed to inspect PDF")?;
    let pages = i32::try_from(info.page_count).unwrap_or(i32::MAX);

    let update = ScoreInfoUpdate {
        pages,
        title: None,
        composer: None,
    };
    Ok(ctx
        .scores
        .update_info(score.id, &update)
        .await?
        .map(|_| pages))
}

fn score_gone(what: &str) -> serde_json::Value {
    tracing::info!("Score no longer exists, skipping {}", what);
    json!({ "success": false, "reason": "score not found" })
}

pub struct ThumbnailTaskHandler;

#[async_trait]
impl TaskHandler for ThumbnailTaskHandler {
    #[tracing::instrument(skip(self, task, ctx), fields(task_id = %task.id, score_id = tracing::field::Empty, page = tracing::field::Empty))]
    async fn process(&self, task: &Task, ctx: &ProcessingContext) -> Result<serde_json::Value> {
        let payload: GenerateThumbnailPayload = payload(task)?;
        let span = tracing::Span::current();
        span.record("score_id", tracing::field::display(payload.score_id));
        span.record("page", payload.page);

        if payload.page < 1 {
            return Err(TaskError::unrecoverable(anyhow::anyhow!(
                "Page {} is not a valid page number",
                payload.page
            ))
            .into());
        }

        let Some(score) = ctx.score(payload.score_id).await? else {
            return Ok(score_gone("thumbnail"));
        };

        let pages_known = score.pages;
        if let Some(pages) = pages_known {
            check_page(payload.page, pages)?;
        }

        let pdf = ctx.load_original(&score).await?;
        if pages_known.is_none() {
            let Some(pages) = record_page_count(ctx, &score, pdf.clone()).await? else {
                return Ok(score_gone("thumbnail"));
            };
            check_page(payload.page, pages)?;
        }

        let rendered = render_page(ctx, &score, pdf, payload.page).await?;
        let cover = (payload.page == 1).then_some(rendered.key.as_str());
        if !keep_or_discard(ctx, score.id, cover, &rendered.written).await? {
            return Ok(json!({ "success": false, "reason": "score deleted during rendering" }));
        }

        tracing::info!(key = %rendered.key, "Thumbnail generated");
        Ok(json!({
            "success": true,
            "score_id": score.id,
            "page": payload.page,
            "thumbnail_key": rendered.key,
        }))
    }
}

fn check_page(page: i32, pages: i32) -> Result<()> {
    if page > pages {
        return Err(TaskError::unrecoverable(anyhow::anyhow!(
            "Page {} exceeds page count {}",
            page,
            pages
        ))
        .into());
    }
    Ok(())
}

/// Every page of a score. The page count comes from the document itself, so
/// this also works before `process_pdf_info` has run.
pub struct PageThumbnailsTaskHandler;

#[async_trait]
impl TaskHandler for PageThumbnailsTaskHandler {
    #[tracing::instrument(skip(self, task, ctx), fields(task_id = %task.id, score_id = tracing::field::Empty))]
    async fn process(&self, task: &Task, ctx: &ProcessingContext) -> Result<serde_json::Value> {
        let payload: GenerateAllPageThumbnailsPayload = payload(task)?;
        tracing::Span::current().record("score_id", tracing::field::display(payload.score_id));

        let Some(score) = ctx.score(payload.score_id).await? else {
            return Ok(score_gone("page thumbnails"));
        };

        let pdf = ctx.load_original(&score).await?;
        let Some(pages) = record_page_count(ctx, &score, pdf.clone()).await? else {
            return Ok(score_gone("page thumbnails"));
        };

        let start = std::time::Instant::now();
        let mut written = Vec::new();
        let mut cover = None;
        for page in 1..=pages {
            let rendered = render_page(ctx, &score, pdf.clone(), page).await?;
            if page == 1 {
                cover = Some(rendered.key);
            }
            written.extend(rendered.written);
        }

        if !keep_or_discard(ctx, score.id, cover.as_deref(), &written).await? {
            return Ok(json!({ "success": false, "reason": "score deleted during rendering" }));
        }

        tracing::info!(
            pages,
            duration_ms = start.elapsed().as_millis() as u64,
            "Page thumbnails generated"
        );
        Ok(json!({
            "success": true,
            "score_id": score.id,
            "pages": pages,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_handlers::test_support::{fixture, task_for};
    use crate::task_handlers::CleanupTaskHandler;
    use scoremate_core::models::{DeleteScoreFilesPayload, ScoreUsage};
    use scoremate_db::{InMemoryRepository, UploadCommitter};
    use scoremate_processing::DocumentInfo;

    fn info(pages: u32) -> DocumentInfo {
        DocumentInfo {
            page_count: pages,
            title: None,
            author: None,
        }
    }

    #[tokio::test]
    async fn cover_is_written_and_recorded() {
        let fx = fixture(info(4));
        let score = fx.seed_score("Partita").await;

        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 1,
            },
        );
        let result = ThumbnailTaskHandler.process(&task, &fx.ctx).await.unwrap();

        let cover = keys::cover_thumbnail_key(score.user_id, score.id);
        assert_eq!(result["thumbnail_key"], cover.as_str());
        assert_eq!(
            fx.storage.content_type(&cover).as_deref(),
            Some(THUMBNAIL_CONTENT_TYPE)
        );
        let stored = fx.ctx.scores.get_by_id(score.id).await.unwrap().unwrap();
        assert_eq!(stored.thumbnail_key, Some(cover));
    }

    #[tokio::test]
    async fn rerunning_overwrites() {
        let fx = fixture(info(4));
        let score = fx.seed_score("Partita").await;
        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 2,
            },
        );

        ThumbnailTaskHandler.process(&task, &fx.ctx).await.unwrap();
        ThumbnailTaskHandler.process(&task, &fx.ctx).await.unwrap();

        let page_key = keys::page_thumbnail_key(score.user_id, score.id, 2);
        assert_eq!(fx.storage.download(&page_key).await.unwrap(), b"jpeg:2");
        assert_eq!(*fx.renderer.rendered.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn page_beyond_count_is_unrecoverable() {
        let fx = fixture(info(4));
        let score = fx.seed_score("Partita").await;
        fx.ctx
            .scores
            .update_info(
                score.id,
                &ScoreInfoUpdate {
                    pages: 4,
                    title: None,
                    composer: None,
                },
            )
            .await
            .unwrap();

        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 9,
            },
        );
        let err = ThumbnailTaskHandler
            .process(&task, &fx.ctx)
            .await
            .unwrap_err();
        assert!(TaskError::is_unrecoverable(&err));
        assert!(fx.renderer.rendered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_original_is_unrecoverable() {
        let fx = fixture(info(1));
        let score = fx.seed_score("Partita").await;
        fx.storage.delete(&score.s3_key).await.unwrap();

        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 1,
            },
        );
        let err = ThumbnailTaskHandler
            .process(&task, &fx.ctx)
            .await
            .unwrap_err();
        assert!(TaskError::is_unrecoverable(&err));
    }

    #[tokio::test]
    async fn all_pages_are_rendered() {
        let fx = fixture(info(3));
        let score = fx.seed_score("Partita").await;

        let task = task_for(
            score.user_id,
            &GenerateAllPageThumbnailsPayload { score_id: score.id },
        );
        let result = PageThumbnailsTaskHandler
            .process(&task, &fx.ctx)
            .await
            .unwrap();
        assert_eq!(result["pages"], 3);

        let keys_written = fx.storage.keys();
        assert!(keys_written.contains(&keys::cover_thumbnail_key(score.user_id, score.id)));
        for page in 1..=3 {
            assert!(keys_written.contains(&keys::page_thumbnail_key(score.user_id, score.id, page)));
        }
    }

    #[tokio::test]
    async fn all_pages_records_page_count() {
        let fx = fixture(info(3));
        let score = fx.seed_score("Partita").await;
        assert_eq!(score.pages, None);

        let task = task_for(
            score.user_id,
            &GenerateAllPageThumbnailsPayload { score_id: score.id },
        );
        PageThumbnailsTaskHandler
            .process(&task, &fx.ctx)
            .await
            .unwrap();

        let stored = fx.ctx.scores.get_by_id(score.id).await.unwrap().unwrap();
        assert_eq!(stored.pages, Some(3));
        assert_eq!(
            stored.thumbnail_key,
            Some(keys::cover_thumbnail_key(score.user_id, score.id))
        );
    }

    #[tokio::test]
    async fn deleting_after_all_pages_leaves_no_objects() {
        let fx = fixture(info(3));
        let score = fx.seed_score("Partita").await;
        let task = task_for(
            score.user_id,
            &GenerateAllPageThumbnailsPayload { score_id: score.id },
        );
        PageThumbnailsTaskHandler
            .process(&task, &fx.ctx)
            .await
            .unwrap();

        let released = fx
            .repo
            .release_score(score.user_id, score.id)
            .await
            .unwrap()
            .unwrap();
        let cleanup = DeleteScoreFilesPayload {
            user_id: score.user_id,
            score_id: score.id,
            original_key: released.score.s3_key,
            thumbnail_key: released.score.thumbnail_key,
            pages: released.score.pages,
        };
        CleanupTaskHandler
            .process(&task_for(score.user_id, &cleanup), &fx.ctx)
            .await
            .unwrap();

        assert!(fx.storage.keys().is_empty(), "{:?}", fx.storage.keys());
    }

    #[tokio::test]
    async fn single_page_records_page_count_when_unknown() {
        let fx = fixture(info(5));
        let score = fx.seed_score("Partita").await;

        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 5,
            },
        );
        ThumbnailTaskHandler.process(&task, &fx.ctx).await.unwrap();

        let stored = fx.ctx.scores.get_by_id(score.id).await.unwrap().unwrap();
        assert_eq!(stored.pages, Some(5));
    }

    /// Releases the score the moment the cover is about to be recorded.
    struct ReleasedBeforeCover {
        repo: InMemoryRepository,
        user_id: Uuid,
    }

    #[async_trait]
    impl ScoreStore for ReleasedBeforeCover {
        async fn get(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<Score>> {
            ScoreStore::get(&self.repo, user_id, score_id).await
        }

        async fn get_by_id(&self, score_id: Uuid) -> Result<Option<Score>> {
            ScoreStore::get_by_id(&self.repo, score_id).await
        }

        async fn list(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Score>> {
            ScoreStore::list(&self.repo, user_id, limit, offset).await
        }

        async fn usage(&self, user_id: Uuid) -> Result<Vec<ScoreUsage>> {
            ScoreStore::usage(&self.repo, user_id).await
        }

        async fn update_info(
            &self,
            score_id: Uuid,
            update: &ScoreInfoUpdate,
        ) -> Result<Option<Score>> {
            ScoreStore::update_info(&self.repo, score_id, update).await
        }

        async fn set_thumbnail_key(&self, score_id: Uuid, thumbnail_key: &str) -> Result<bool> {
            self.repo.release_score(self.user_id, score_id).await?;
            ScoreStore::set_thumbnail_key(&self.repo, score_id, thumbnail_key).await
        }
    }

    #[tokio::test]
    async fn cover_of_score_deleted_mid_render_is_discarded() {
        let mut fx = fixture(info(2));
        let score = fx.seed_score("Partita").await;
        fx.ctx.scores = Arc::new(ReleasedBeforeCover {
            repo: fx.repo.clone(),
            user_id: score.user_id,
        });

        let task = task_for(
            score.user_id,
            &GenerateThumbnailPayload {
                score_id: score.id,
                page: 1,
            },
        );
        let result = ThumbnailTaskHandler.process(&task, &fx.ctx).await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(fx.storage.keys(), vec![score.s3_key.clone()]);
    }
}
