//! Fixed-window request counters.
//!
//! The Postgres store shares counters between every API process; the
//! in-process sharded limiter in the API crate implements the same trait for
//! single-node deployments.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key` and decide whether it may proceed.
    async fn hit(&self, key: &str, limit: u32, window_secs: u64) -> Result<RateLimitDecision>;

    /// Drop counters whose window has closed. Returns the number removed.
    async fn cleanup_expired(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresRateLimitStore {
    pool: PgPool,
}

impl PostgresRateLimitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for PostgresRateLimitStore {
    async fn hit(&self, key: &str, limit: u32, window_secs: u64) -> Result<RateLimitDecision> {
        let window_secs = window_secs.max(1) as i64;

        let (count, expires_at): (i32, DateTime<Utc>) = sqlx::query_as(
            r#"
            WITH w AS (
                SELECT to_timestamp(
                    (floor(extract(epoch FROM NOW()) / $2) * $2)::double precision
                ) AS window_start
            )
            INSERT INTO rate_limit_counters (key, window_start, count, expires_at)
            SELECT $1, w.window_start, 1, w.window_start + ($2 * interval '1 second')
            FROM w
            ON CONFLICT (key, window_start)
            DO UPDATE SET count = rate_limit_counters.count + 1
            RETURNING count, expires_at
            "#,
        )
        .bind(key)
        .bind(window_secs)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record rate limit hit")?;

        let count = count.max(0) as u32;
        if count <= limit {
            Ok(RateLimitDecision::Allowed {
                remaining: limit - count,
            })
        } else {
            let retry_after = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            Ok(RateLimitDecision::Limited { retry_after })
        }
    }

    #[tracing::instrument(skip(self))]
    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .context("Failed to clean up rate limit counters")?;
        Ok(result.rows_affected())
    }
}
