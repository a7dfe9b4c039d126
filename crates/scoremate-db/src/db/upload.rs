//! Multi-table units of work for the upload protocol.
//!
//! Confirm consumes the reservation, charges the ledger and creates the score
//! in one transaction; release deletes the score and refunds the ledger in
//! another. Neither leaves an intermediate state visible to other sessions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use scoremate_core::models::{Score, ScoreMetadata, UserQuota};

use super::quota::{decrement_used_in, increment_used_in};
use super::reservation::take_in;
use super::score::{delete_in, insert_from_reservation_in};

/// Outcome of a successful confirm.
#[derive(Debug, Clone)]
pub struct CommittedUpload {
    pub score: Score,
    pub quota: UserQuota,
    pub charged_mb: i64,
}

/// Outcome of a successful score release.
#[derive(Debug, Clone)]
pub struct ReleasedScore {
    pub score: Score,
    pub quota: UserQuota,
    pub released_mb: i64,
}

#[async_trait]
pub trait UploadCommitter: Send + Sync {
    /// Consume the caller's live reservation and turn it into a score.
    ///
    /// `None` when the reservation is missing, expired, foreign or already
    /// consumed; the ledger is untouched in that case.
    async fn commit_upload(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
        metadata: &ScoreMetadata,
    ) -> Result<Option<CommittedUpload>>;

    /// Delete the caller's score and refund its megabytes.
    async fn release_score(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<ReleasedScore>>;
}

#[derive(Clone)]
pub struct PostgresUploadCommitter {
    pool: PgPool,
}

impl PostgresUploadCommitter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UploadCommitter for PostgresUploadCommitter {
    #[tracing::instrument(skip(self, metadata))]
    async fn commit_upload(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
        metadata: &ScoreMetadata,
    ) -> Result<Option<CommittedUpload>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for upload confirm")?;

        // The DELETE .. RETURNING row lock makes this the single winner for the id.
        let Some(reservation) = take_in(&mut *tx, upload_id, user_id).await? else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let charged_mb = reservation.charged_mb();
        let quota = increment_used_in(&mut *tx, user_id, charged_mb).await?;
        let score = insert_from_reservation_in(&mut *tx, Uuid::new_v4(), &reservation, metadata).await?;

        tx.commit().await.map_err(|e| {
            tracing::error!(
                error = %e,
                upload_id = %upload_id,
                user_id = %user_id,
                "Failed to commit upload confirm"
            );
            anyhow::anyhow!("Failed to commit upload confirm: {}", e)
        })?;

        tracing::info!(
            upload_id = %upload_id,
            score_id = %score.id,
            user_id = %user_id,
            charged_mb,
            used_mb = quota.used_mb,
            "Upload committed"
        );

        Ok(Some(CommittedUpload {
            score,
            quota,
            charged_mb,
        }))
    }

    #[tracing::instrument(skip(self))]
    async fn release_score(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<ReleasedScore>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for score release")?;

        let Some(score) = delete_in(&mut *tx, user_id, score_id).await? else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let released_mb = score.charged_mb();
        let quota = decrement_used_in(&mut *tx, user_id, released_mb).await?;

        tx.commit()
            .await
            .context("Failed to commit score release")?;

        tracing::info!(
            score_id = %score_id,
            user_id = %user_id,
            released_mb,
            used_mb = quota.used_mb,
            "Score released"
        );

        Ok(Some(ReleasedScore {
            score,
            quota,
            released_mb,
        }))
    }
}
