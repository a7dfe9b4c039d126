//! Document record store (`scores` table).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use scoremate_core::models::{Reservation, Score, ScoreInfoUpdate, ScoreMetadata, ScoreUsage};

pub(crate) const SCORE_COLUMNS: &str = r#"
    id,
    user_id,
    title,
    composer,
    instrumentation,
    tags,
    s3_key,
    size_bytes,
    mime_type,
    pages,
    thumbnail_key,
    content_hash,
    created_at,
    updated_at
"#;

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Score owned by `user_id`; foreign and missing scores are both `None`.
    async fn get(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<Score>>;

    /// Worker-side lookup without an owner check.
    async fn get_by_id(&self, score_id: Uuid) -> Result<Option<Score>>;

    /// Owner's scores, newest first.
    async fn list(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Score>>;

    async fn usage(&self, user_id: Uuid) -> Result<Vec<ScoreUsage>>;

    /// Record page count and fill title/composer only where they are empty.
    async fn update_info(&self, score_id: Uuid, update: &ScoreInfoUpdate) -> Result<Option<Score>>;

    async fn set_thumbnail_key(&self, score_id: Uuid, thumbnail_key: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct PostgresScoreStore {
    pool: PgPool,
}

impl PostgresScoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Create the score for a consumed reservation.
pub(crate) async fn insert_from_reservation_in(
    conn: &mut PgConnection,
    score_id: Uuid,
    reservation: &Reservation,
    metadata: &ScoreMetadata,
) -> Result<Score> {
    let sql = format!(
        r#"
        INSERT INTO scores (
            id, user_id, title, composer, instrumentation, tags,
            s3_key, size_bytes, mime_type
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        SCORE_COLUMNS
    );

    sqlx::query_as::<Postgres, Score>(&sql)
        .bind(score_id)
        .bind(reservation.user_id)
        .bind(&metadata.title)
        .bind(&metadata.composer)
        .bind(&metadata.instrumentation)
        .bind(&metadata.tags)
        .bind(&reservation.s3_key)
        .bind(reservation.size_bytes)
        .bind(&reservation.mime_type)
        .fetch_one(conn)
        .await
        .context("Failed to insert score")
}

pub(crate) async fn delete_in(
    conn: &mut PgConnection,
    user_id: Uuid,
    score_id: Uuid,
) -> Result<Option<Score>> {
    let sql = format!(
        r#"
        DELETE FROM scores
        WHERE id = $1 AND user_id = $2
        RETURNING {}
        "#,
        SCORE_COLUMNS
    );

    sqlx::query_as::<Postgres, Score>(&sql)
        .bind(score_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
        .context("Failed to delete score")
}

#[async_trait]
impl ScoreStore for PostgresScoreStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<Score>> {
        let sql = format!(
            "SELECT {} FROM scores WHERE id = $1 AND user_id = $2",
            SCORE_COLUMNS
        );
        sqlx::query_as::<Postgres, Score>(&sql)
            .bind(score_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch score")
    }

    #[tracing::instrument(skip(self))]
    async fn get_by_id(&self, score_id: Uuid) -> Result<Option<Score>> {
        let sql = format!("SELECT {} FROM scores WHERE id = $1", SCORE_COLUMNS);
        sqlx::query_as::<Postgres, Score>(&sql)
            .bind(score_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch score")
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Score>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM scores
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            SCORE_COLUMNS
        );
        sqlx::query_as::<Postgres, Score>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list scores")
    }

    #[tracing::instrument(skip(self))]
    async fn usage(&self, user_id: Uuid) -> Result<Vec<ScoreUsage>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT size_bytes, (thumbnail_key IS NOT NULL AND thumbnail_key <> '') AS has_thumbnail
            FROM scores
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch score usage")?;

        rows.iter()
            .map(|row| {
                Ok(ScoreUsage {
                    size_bytes: row.try_get("size_bytes")?,
                    has_thumbnail: row.try_get("has_thumbnail")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode score usage")
    }

    #[tracing::instrument(skip(self, update), fields(pages = update.pages))]
    async fn update_info(&self, score_id: Uuid, update: &ScoreInfoUpdate) -> Result<Option<Score>> {
        let sql = format!(
            r#"
            UPDATE scores
            SET pages = $2,
                title = CASE WHEN NULLIF(BTRIM(title), '') IS NULL AND $3::text IS NOT NULL
                             THEN $3 ELSE title END,
                composer = COALESCE(NULLIF(BTRIM(composer), ''), $4),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SCORE_COLUMNS
        );
        sqlx::query_as::<Postgres, Score>(&sql)
            .bind(score_id)
            .bind(update.pages)
            .bind(&update.title)
            .bind(&update.composer)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update score info")
    }

    #[tracing::instrument(skip(self))]
    async fn set_thumbnail_key(&self, score_id: Uuid, thumbnail_key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scores
            SET thumbnail_key = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(score_id)
        .bind(thumbnail_key)
        .execute(&self.pool)
        .await
        .context("Failed to set thumbnail key")?;

        Ok(result.rows_affected() > 0)
    }
}
