//! Quota ledger: per-user storage counters.
//!
//! `used_quota_mb` is only ever moved by atomic SQL arithmetic, never by a
//! read-modify-write in application code.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use scoremate_core::models::UserQuota;

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Return the user's quota, creating the row with `default_total_mb` on first use.
    async fn ensure_user(&self, user_id: Uuid, default_total_mb: i64) -> Result<UserQuota>;

    async fn get_quota(&self, user_id: Uuid) -> Result<Option<UserQuota>>;

    async fn increment_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota>;

    /// Clamps at zero whatever the delta.
    async fn decrement_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota>;
}

#[derive(Clone)]
pub struct PostgresQuotaLedger {
    pool: PgPool,
}

impl PostgresQuotaLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn increment_used_in(
    conn: &mut PgConnection,
    user_id: Uuid,
    delta_mb: i64,
) -> Result<UserQuota> {
    sqlx::query_as::<Postgres, UserQuota>(
        r#"
        UPDATE users
        SET used_quota_mb = used_quota_mb + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, total_quota_mb, used_quota_mb
        "#,
    )
    .bind(user_id)
    .bind(delta_mb.max(0))
    .fetch_one(conn)
    .await
    .context("Failed to increment used quota")
}

pub(crate) async fn decrement_used_in(
    conn: &mut PgConnection,
    user_id: Uuid,
    delta_mb: i64,
) -> Result<UserQuota> {
    sqlx::query_as::<Postgres, UserQuota>(
        r#"
        UPDATE users
        SET used_quota_mb = GREATEST(used_quota_mb - $2, 0),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, total_quota_mb, used_quota_mb
        "#,
    )
    .bind(user_id)
    .bind(delta_mb.max(0))
    .fetch_one(conn)
    .await
    .context("Failed to decrement used quota")
}

#[async_trait]
impl QuotaLedger for PostgresQuotaLedger {
    #[tracing::instrument(skip(self))]
    async fn ensure_user(&self, user_id: Uuid, default_total_mb: i64) -> Result<UserQuota> {
        sqlx::query(
            r#"
            INSERT INTO users (id, total_quota_mb, used_quota_mb)
            VALUES ($1, $2, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(default_total_mb)
        .execute(&self.pool)
        .await
        .context("Failed to provision user")?;

        self.get_quota(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("User {} missing after provisioning", user_id))
    }

    #[tracing::instrument(skip(self))]
    async fn get_quota(&self, user_id: Uuid) -> Result<Option<UserQuota>> {
        sqlx::query_as::<Postgres, UserQuota>(
            r#"
            SELECT id, total_quota_mb, used_quota_mb
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user quota")
    }

    #[tracing::instrument(skip(self))]
    async fn increment_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        let quota = increment_used_in(&mut *conn, user_id, delta_mb).await?;
        tracing::debug!(user_id = %user_id, delta_mb, used_mb = quota.used_mb, "Quota incremented");
        Ok(quota)
    }

    #[tracing::instrument(skip(self))]
    async fn decrement_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        let quota = decrement_used_in(&mut *conn, user_id, delta_mb).await?;
        tracing::debug!(user_id = %user_id, delta_mb, used_mb = quota.used_mb, "Quota decremented");
        Ok(quota)
    }
}
