use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::quota::{bytes_to_charged_mb, ScoreUsage};

/// Durable record of a confirmed upload and its derived artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub composer: Option<String>,
    pub instrumentation: Option<String>,
    pub tags: Vec<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub mime_type: String,
    /// Filled in by background processing.
    pub pages: Option<i32>,
    pub thumbnail_key: Option<String>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Score {
    /// Megabytes this score holds in the owner's quota.
    pub fn charged_mb(&self) -> i64 {
        bytes_to_charged_mb(self.size_bytes)
    }

    pub fn usage(&self) -> ScoreUsage {
        ScoreUsage {
            size_bytes: self.size_bytes,
            has_thumbnail: self
                .thumbnail_key
                .as_deref()
                .is_some_and(|key| !key.is_empty()),
        }
    }

    /// Record the page count; title and composer are filled only when blank.
    pub fn apply_info(&mut self, update: &ScoreInfoUpdate) {
        self.pages = Some(update.pages);
        if self.title.trim().is_empty() {
            if let Some(title) = &update.title {
                self.title = title.clone();
            }
        }
        let composer_blank = self
            .composer
            .as_deref()
            .map_or(true, |c| c.trim().is_empty());
        if composer_blank && update.composer.is_some() {
            self.composer = update.composer.clone();
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Score {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Score {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            composer: row.try_get("composer")?,
            instrumentation: row.try_get("instrumentation")?,
            tags: row
                .try_get::<Option<Vec<String>>, _>("tags")?
                .unwrap_or_default(),
            s3_key: row.try_get("s3_key")?,
            size_bytes: row.try_get("size_bytes")?,
            mime_type: row.try_get("mime_type")?,
            pages: row.try_get("pages")?,
            thumbnail_key: row.try_get("thumbnail_key")?,
            content_hash: row.try_get("content_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Caller-supplied descriptive fields recorded when an upload is confirmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreMetadata {
    pub title: String,
    pub composer: Option<String>,
    pub instrumentation: Option<String>,
    pub tags: Vec<String>,
}

/// Metadata read out of the PDF itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreInfoUpdate {
    pub pages: i32,
    /// Applied only when the record has no title yet.
    pub title: Option<String>,
    /// Applied only when the record has no composer yet.
    pub composer: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScoreResponse {
    pub id: Uuid,
    pub title: String,
    pub composer: Option<String>,
    pub instrumentation: Option<String>,
    pub tags: Vec<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub pages: Option<i32>,
    pub thumbnail_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Score> for ScoreResponse {
    fn from(score: Score) -> Self {
        Self {
            id: score.id,
            title: score.title,
            composer: score.composer,
            instrumentation: score.instrumentation,
            tags: score.tags,
            s3_key: score.s3_key,
            size_bytes: score.size_bytes,
            mime_type: score.mime_type,
            pages: score.pages,
            thumbnail_key: score.thumbnail_key,
            created_at: score.created_at,
            updated_at: score.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ScoreListQuery {
    /// Page size, at most 100
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ScoreListQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 100;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Reply to the reprocessing endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessingStartedResponse {
    pub message: String,
    pub score_id: Uuid,
    pub task_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_clamps_limit() {
        let q = ScoreListQuery {
            limit: Some(1000),
            offset: Some(-5),
        };
        assert_eq!(q.limit(), 100);
        assert_eq!(q.offset(), 0);

        let q = ScoreListQuery {
            limit: None,
            offset: None,
        };
        assert_eq!(q.limit(), 50);
    }

    fn score(title: &str, composer: Option<&str>) -> Score {
        let now = Utc::now();
        Score {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.to_string(),
            composer: composer.map(String::from),
            instrumentation: None,
            tags: vec![],
            s3_key: "k".to_string(),
            size_bytes: 1,
            mime_type: "application/pdf".to_string(),
            pages: None,
            thumbnail_key: None,
            content_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn info_fills_only_blank_fields() {
        let update = ScoreInfoUpdate {
            pages: 12,
            title: Some("From PDF".to_string()),
            composer: Some("Bach".to_string()),
        };

        let mut named = score("Goldberg", Some("J.S. Bach"));
        named.apply_info(&update);
        assert_eq!(named.pages, Some(12));
        assert_eq!(named.title, "Goldberg");
        assert_eq!(named.composer.as_deref(), Some("J.S. Bach"));

        let mut blank = score("  ", Some(""));
        blank.apply_info(&update);
        assert_eq!(blank.title, "From PDF");
        assert_eq!(blank.composer.as_deref(), Some("Bach"));
    }
}
