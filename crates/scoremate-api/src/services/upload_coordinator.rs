//! Reserve, confirm and cancel of client-direct uploads.
//!
//! A reservation is an intent, not a hold: reserve only checks the ledger and
//! confirm is the single point where megabytes are charged. Concurrent
//! reservations by one user may therefore all be confirmed past the quota.

use chrono::Duration as ChronoDuration;
use scoremate_core::config::UploadConfig;
use scoremate_core::models::{
    bytes_to_required_mb, GenerateThumbnailPayload, ProcessPdfInfoPayload, Reservation,
    UploadCancelResponse, UploadConfirmRequest, UploadConfirmResponse, UploadUrlRequest,
    UploadUrlResponse,
};
use scoremate_core::AppError;
use scoremate_db::{QuotaLedger, Repositories, ReservationStore, UploadCommitter};
use scoremate_storage::{keys, Storage};
use scoremate_worker::TaskQueue;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::error::app_error_from_storage;

#[derive(Clone)]
pub struct UploadCoordinator {
    quota: Arc<dyn QuotaLedger>,
    reservations: Arc<dyn ReservationStore>,
    uploads: Arc<dyn UploadCommitter>,
    storage: Arc<dyn Storage>,
    task_queue: TaskQueue,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        repos: &Repositories,
        storage: Arc<dyn Storage>,
        task_queue: TaskQueue,
        config: UploadConfig,
    ) -> Self {
        Self {
            quota: repos.quota.clone(),
            reservations: repos.reservations.clone(),
            uploads: repos.uploads.clone(),
            storage,
            task_queue,
            config,
        }
    }

    /// Admit an upload and hand back a signed PUT URL for it.
    ///
    /// The reservation is written before the URL is signed; when signing fails
    /// the row is left to expire with its TTL.
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %user_id, size_bytes = request.size_bytes, upload_id)
    )]
    pub async fn reserve(
        &self,
        user_id: Uuid,
        request: &UploadUrlRequest,
    ) -> Result<UploadUrlResponse, AppError> {
        request.validate()?;

        let mime_type = request.mime_type.trim().to_lowercase();
        if !self.config.is_mime_allowed(&mime_type) {
            return Err(AppError::UnsupportedMediaType(mime_type));
        }

        let max_bytes = self.config.max_upload_size_bytes();
        if request.size_bytes > max_bytes {
            return Err(AppError::FileTooLarge {
                size_bytes: request.size_bytes,
                max_bytes,
            });
        }

        let quota = self
            .quota
            .ensure_user(user_id, self.config.default_quota_mb)
            .await?;
        if !quota.can_upload(request.size_bytes) {
            return Err(AppError::QuotaExceeded {
                required_mb: bytes_to_required_mb(request.size_bytes),
                available_mb: quota.available_mb(),
                used_mb: quota.used_mb,
                total_mb: quota.total_mb,
            });
        }

        let upload_id = Uuid::new_v4();
        tracing::Span::current().record("upload_id", tracing::field::display(upload_id));

        let filename = request
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from);
        let s3_key = keys::original_key(user_id, upload_id, filename.as_deref());

        let reservation = Reservation::new(
            upload_id,
            user_id,
            request.size_bytes,
            s3_key.clone(),
            mime_type.clone(),
            filename,
            ChronoDuration::seconds(self.config.reservation_ttl_secs),
        );
        let reservation = self.reservations.insert(&reservation).await?;

        let signed = self
            .storage
            .sign_put(
                &s3_key,
                &mime_type,
                Duration::from_secs(self.config.upload_url_expiry_secs()),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %s3_key, "Failed to sign upload URL");
                app_error_from_storage(e)
            })?;

        tracing::info!(
            key = %s3_key,
            expires_at = %reservation.expires_at,
            "Upload reserved"
        );

        Ok(UploadUrlResponse {
            upload_id,
            upload_url: signed.url,
            s3_key,
            headers: signed.headers,
            expires_in: signed.expires_in.as_secs(),
            method: signed.method,
        })
    }

    /// Consume the caller's reservation, charge the ledger and create the score.
    ///
    /// Missing, expired, foreign and already consumed reservations all fail the
    /// same way.
    #[tracing::instrument(skip(self, request), fields(user_id = %user_id, upload_id = %request.upload_id))]
    pub async fn confirm(
        &self,
        user_id: Uuid,
        request: &UploadConfirmRequest,
    ) -> Result<UploadConfirmResponse, AppError> {
        request.validate()?;
        let metadata = request.metadata();
        if metadata.title.is_empty() {
            return Err(AppError::Validation("Title must not be blank".to_string()));
        }

        let committed = self
            .uploads
            .commit_upload(user_id, request.upload_id, &metadata)
            .await?
            .ok_or(AppError::ReservationExpiredOrMissing)?;

        let score_id = committed.score.id;
        tracing::info!(
            score_id = %score_id,
            charged_mb = committed.charged_mb,
            used_mb = committed.quota.used_mb,
            total_mb = committed.quota.total_mb,
            "Upload confirmed"
        );

        self.enqueue_processing(user_id, score_id).await;

        Ok(UploadConfirmResponse {
            message: "Upload confirmed".to_string(),
            upload_id: request.upload_id,
            score_id,
            quota_used_mb: committed.charged_mb,
            remaining_quota_mb: committed.quota.available_mb(),
        })
    }

    /// Drop the caller's reservation. Unknown, expired and foreign ids are a no-op.
    #[tracing::instrument(skip(self), fields(user_id = %user_id, upload_id = %upload_id))]
    pub async fn cancel(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
    ) -> Result<UploadCancelResponse, AppError> {
        let removed = self.reservations.delete(upload_id, user_id).await?;
        tracing::info!(removed, "Upload cancelled");

        Ok(UploadCancelResponse {
            message: "Upload cancelled".to_string(),
            upload_id,
        })
    }

    /// Page count and cover thumbnail. The upload already succeeded, so
    /// enqueue failures are only logged.
    async fn enqueue_processing(&self, user_id: Uuid, score_id: Uuid) {
        if let Err(e) = self
            .task_queue
            .submit_task(user_id, &ProcessPdfInfoPayload { score_id })
            .await
        {
            tracing::error!(error = %e, score_id = %score_id, "Failed to enqueue PDF info task");
        }

        if let Err(e) = self
            .task_queue
            .submit_task(user_id, &GenerateThumbnailPayload { score_id, page: 1 })
            .await
        {
            tracing::error!(error = %e, score_id = %score_id, "Failed to enqueue thumbnail task");
        }
    }
}
