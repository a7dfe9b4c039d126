use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::quota::bytes_to_charged_mb;

/// A pending upload: the client holds a signed PUT URL and has not yet
/// confirmed or cancelled. Never updated in place; consumed at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub size_bytes: i64,
    pub s3_key: String,
    pub mime_type: String,
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        id: Uuid,
        user_id: Uuid,
        size_bytes: i64,
        s3_key: String,
        mime_type: String,
        original_filename: Option<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id,
            user_id,
            size_bytes,
            s3_key,
            mime_type,
            original_filename,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Key under which keyed stores hold this reservation.
    pub fn store_key(id: Uuid) -> String {
        format!("quota_reservation:{}", id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_live(&self) -> bool {
        !self.is_expired_at(Utc::now())
    }

    /// Lifetime the reservation was created with.
    pub fn ttl(&self) -> Duration {
        self.expires_at - self.created_at
    }

    /// Megabytes the ledger is charged on confirm.
    pub fn charged_mb(&self) -> i64 {
        bytes_to_charged_mb(self.size_bytes)
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Reservation {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Reservation {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            size_bytes: row.try_get("size_bytes")?,
            s3_key: row.try_get("s3_key")?,
            mime_type: row.try_get("mime_type")?,
            original_filename: row.try_get("original_filename")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BYTES_PER_MB;

    fn reservation(ttl_secs: i64) -> Reservation {
        Reservation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            50 * BYTES_PER_MB + 123,
            "u/uploads/x/original.pdf".to_string(),
            "application/pdf".to_string(),
            Some("bach.pdf".to_string()),
            Duration::seconds(ttl_secs),
        )
    }

    #[test]
    fn expires_after_ttl() {
        let r = reservation(300);
        assert!(r.is_live());
        assert!(!r.is_expired_at(r.created_at + Duration::seconds(299)));
        assert!(r.is_expired_at(r.created_at + Duration::seconds(300)));
    }

    #[test]
    fn ttl_is_kept_for_the_store() {
        assert_eq!(reservation(300).ttl(), Duration::seconds(300));
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        assert!(!reservation(0).is_live());
    }

    #[test]
    fn charges_whole_megabytes() {
        assert_eq!(reservation(300).charged_mb(), 50);
    }

    #[test]
    fn store_key_is_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            Reservation::store_key(id),
            "quota_reservation:00000000-0000-0000-0000-000000000000"
        );
    }
}
