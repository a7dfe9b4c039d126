//! Reservation store backed by the `upload_reservations` table.
//!
//! Expiry is enforced on read: every query filters on `expires_at > NOW()`,
//! so a row the sweeper has not yet removed is already invisible. Rows are
//! stamped with the database clock on insert for the same reason; only the
//! TTL of the caller's reservation is used.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use scoremate_core::models::Reservation;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Store a new reservation and return it as stored.
    async fn insert(&self, reservation: &Reservation) -> Result<Reservation>;

    /// Remove the reservation if present. Returns whether a row was removed.
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Remove every expired reservation. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
}

impl PostgresReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Atomically remove and return a live reservation owned by `user_id`.
/// At most one caller ever receives `Some` for a given id.
pub(crate) async fn take_in(
    conn: &mut PgConnection,
    id: Uuid,
    user_id: Uuid,
) -> Result<Option<Reservation>> {
    sqlx::query_as::<Postgres, Reservation>(
        r#"
        DELETE FROM upload_reservations
        WHERE id = $1
            AND user_id = $2
            AND expires_at > NOW()
        RETURNING
            id,
            user_id,
            size_bytes,
            s3_key,
            mime_type,
            original_filename,
            created_at,
            expires_at
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .context("Failed to consume upload reservation")
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    #[tracing::instrument(skip(self, reservation), fields(upload_id = %reservation.id, user_id = %reservation.user_id))]
    async fn insert(&self, reservation: &Reservation) -> Result<Reservation> {
        let stored = sqlx::query_as::<Postgres, Reservation>(
            r#"
            INSERT INTO upload_reservations (
                id, user_id, size_bytes, s3_key, mime_type, original_filename,
                created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW() + make_interval(secs => $7))
            RETURNING
                id,
                user_id,
                size_bytes,
                s3_key,
                mime_type,
                original_filename,
                created_at,
                expires_at
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.user_id)
        .bind(reservation.size_bytes)
        .bind(&reservation.s3_key)
        .bind(&reservation.mime_type)
        .bind(&reservation.original_filename)
        .bind(reservation.ttl().num_milliseconds() as f64 / 1000.0)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert upload reservation")?;

        tracing::debug!(
            key = %Reservation::store_key(stored.id),
            expires_at = %stored.expires_at,
            "Reservation stored"
        );
        Ok(stored)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_reservations
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("Failed to delete upload reservation")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_reservations
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to purge expired reservations")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(count, "Purged expired upload reservations");
        }
        Ok(count)
    }
}
