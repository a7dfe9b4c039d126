//! Reads, downloads, deletion and reprocessing of confirmed scores.

use scoremate_core::models::{
    DeleteScoreFilesPayload, DownloadTarget, DownloadUrlQuery, DownloadUrlResponse,
    GenerateAllPageThumbnailsPayload, GenerateThumbnailPayload, ProcessPdfInfoPayload,
    ProcessingStartedResponse, Score, ScoreListQuery,
};
use scoremate_core::AppError;
use scoremate_db::{Repositories, ScoreStore, UploadCommitter};
use scoremate_storage::{keys, Storage};
use scoremate_worker::TaskQueue;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::app_error_from_storage;

#[derive(Clone)]
pub struct ScoreLifecycle {
    scores: Arc<dyn ScoreStore>,
    uploads: Arc<dyn UploadCommitter>,
    storage: Arc<dyn Storage>,
    task_queue: TaskQueue,
    url_expiry: Duration,
}

fn score_not_found(score_id: Uuid) -> AppError {
    AppError::NotFound(format!("Score {} not found", score_id))
}

impl ScoreLifecycle {
    pub fn new(
        repos: &Repositories,
        storage: Arc<dyn Storage>,
        task_queue: TaskQueue,
        url_expiry_secs: u64,
    ) -> Self {
        Self {
            scores: repos.scores.clone(),
            uploads: repos.uploads.clone(),
            storage,
            task_queue,
            url_expiry: Duration::from_secs(url_expiry_secs),
        }
    }

    /// A score owned by `user_id`. Someone else's score is reported as missing.
    pub async fn get(&self, user_id: Uuid, score_id: Uuid) -> Result<Score, AppError> {
        self.scores
            .get(user_id, score_id)
            .await?
            .ok_or_else(|| score_not_found(score_id))
    }

    pub async fn list(&self, user_id: Uuid, query: &ScoreListQuery) -> Result<Vec<Score>, AppError> {
        Ok(self
            .scores
            .list(user_id, query.limit(), query.offset())
            .await?)
    }

    /// Sign a GET URL for the original, the cover or one page thumbnail.
    ///
    /// The URL is signed whether or not the thumbnail exists yet; a client
    /// that asks too early gets a 404 from storage.
    #[tracing::instrument(skip(self, query), fields(user_id = %user_id, score_id = %query.score_id, file_type = %query.file_type))]
    pub async fn download_url(
        &self,
        user_id: Uuid,
        query: &DownloadUrlQuery,
    ) -> Result<DownloadUrlResponse, AppError> {
        let target = query.target()?;
        let score = self.get(user_id, query.score_id).await?;

        let key = match target {
            DownloadTarget::Original => score.s3_key.clone(),
            DownloadTarget::Thumbnail => score
                .thumbnail_key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| keys::cover_thumbnail_key(user_id, score.id)),
            DownloadTarget::Page(page) => {
                if let Some(pages) = score.pages {
                    if page > pages {
                        return Err(AppError::Validation(format!(
                            "page {} is out of range, score has {} pages",
                            page, pages
                        )));
                    }
                }
                keys::page_thumbnail_key(user_id, score.id, page)
            }
        };

        let signed = self
            .storage
            .sign_get(&key, self.url_expiry)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %key, "Failed to sign download URL");
                app_error_from_storage(e)
            })?;

        Ok(DownloadUrlResponse {
            download_url: signed.url,
            s3_key: key,
            expires_in: signed.expires_in.as_secs(),
            method: signed.method,
            file_type: query.file_type,
        })
    }

    /// Remove the record and give its megabytes back in one step, then queue
    /// the object cleanup. Storage trouble never keeps quota charged.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, score_id = %score_id))]
    pub async fn delete(&self, user_id: Uuid, score_id: Uuid) -> Result<(), AppError> {
        let released = self
            .uploads
            .release_score(user_id, score_id)
            .await?
            .ok_or_else(|| score_not_found(score_id))?;

        tracing::info!(
            released_mb = released.released_mb,
            used_mb = released.quota.used_mb,
            "Score deleted"
        );

        let score = released.score;
        let payload = DeleteScoreFilesPayload {
            user_id,
            score_id,
            original_key: score.s3_key,
            thumbnail_key: score.thumbnail_key,
            pages: score.pages,
        };
        if let Err(e) = self.task_queue.submit_task(user_id, &payload).await {
            tracing::error!(
                error = %e,
                original_key = %payload.original_key,
                "Failed to enqueue score file cleanup, objects are orphaned"
            );
        }

        Ok(())
    }

    pub async fn regenerate_thumbnail(
        &self,
        user_id: Uuid,
        score_id: Uuid,
    ) -> Result<ProcessingStartedResponse, AppError> {
        self.get(user_id, score_id).await?;
        let task_id = self
            .task_queue
            .submit_task(user_id, &GenerateThumbnailPayload { score_id, page: 1 })
            .await?;
        Ok(started("Thumbnail regeneration queued", score_id, task_id))
    }

    pub async fn refresh_info(
        &self,
        user_id: Uuid,
        score_id: Uuid,
    ) -> Result<ProcessingStartedResponse, AppError> {
        self.get(user_id, score_id).await?;
        let task_id = self
            .task_queue
            .submit_task(user_id, &ProcessPdfInfoPayload { score_id })
            .await?;
        Ok(started("PDF info extraction queued", score_id, task_id))
    }

    pub async fn generate_page_thumbnails(
        &self,
        user_id: Uuid,
        score_id: Uuid,
    ) -> Result<ProcessingStartedResponse, AppError> {
        self.get(user_id, score_id).await?;
        let task_id = self
            .task_queue
            .submit_task(user_id, &GenerateAllPageThumbnailsPayload { score_id })
            .await?;
        Ok(started("Page thumbnail generation queued", score_id, task_id))
    }
}

fn started(message: &str, score_id: Uuid, task_id: Uuid) -> ProcessingStartedResponse {
    ProcessingStartedResponse {
        message: message.to_string(),
        score_id,
        task_id,
    }
}
