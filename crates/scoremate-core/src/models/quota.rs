use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub const BYTES_PER_MB: i64 = 1024 * 1024;

/// Whole megabytes charged against the ledger for an upload of `size_bytes`.
pub fn bytes_to_charged_mb(size_bytes: i64) -> i64 {
    size_bytes.max(0) / BYTES_PER_MB
}

/// Megabytes an upload needs for the admission check, rounded up for reporting.
pub fn bytes_to_required_mb(size_bytes: i64) -> i64 {
    let size_bytes = size_bytes.max(0);
    (size_bytes + BYTES_PER_MB - 1) / BYTES_PER_MB
}

/// Snapshot of a user's storage counters.
///
/// `used_mb` can exceed `total_mb` when concurrent reservations were all
/// confirmed; that overshoot is reported as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_id: Uuid,
    pub total_mb: i64,
    pub used_mb: i64,
}

impl UserQuota {
    pub fn available_mb(&self) -> i64 {
        (self.total_mb - self.used_mb).max(0)
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.total_mb == 0 {
            0.0
        } else {
            self.used_mb as f64 / self.total_mb as f64 * 100.0
        }
    }

    /// Admission check for a new reservation, in fractional megabytes.
    pub fn can_upload(&self, size_bytes: i64) -> bool {
        self.available_mb() as f64 >= size_bytes as f64 / BYTES_PER_MB as f64
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UserQuota {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UserQuota {
            user_id: row.try_get("id")?,
            total_mb: row.try_get("total_quota_mb")?,
            used_mb: row.try_get("used_quota_mb")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuotaSummary {
    pub total_mb: i64,
    pub used_mb: i64,
    pub available_mb: i64,
    /// Percentage of the quota in use, rounded to one decimal; may exceed 100.
    pub usage_percentage: f64,
}

impl From<UserQuota> for QuotaSummary {
    fn from(quota: UserQuota) -> Self {
        Self {
            total_mb: quota.total_mb,
            used_mb: quota.used_mb,
            available_mb: quota.available_mb(),
            usage_percentage: (quota.usage_percentage() * 10.0).round() / 10.0,
        }
    }
}

/// Size and thumbnail state of one stored score, input to the quota breakdown.
#[derive(Debug, Clone, Copy)]
pub struct ScoreUsage {
    pub size_bytes: i64,
    pub has_thumbnail: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SizeBucket {
    pub range: String,
    pub count: i64,
    pub total_size_mb: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuotaRecommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuotaDetailsResponse {
    pub quota_summary: QuotaSummary,
    pub size_breakdown: Vec<SizeBucket>,
    pub recommendations: Vec<QuotaRecommendation>,
}

const LARGE_FILE_BYTES: i64 = 20 * BYTES_PER_MB;
const HIGH_USAGE_PERCENT: f64 = 80.0;

const SIZE_BUCKETS: [(&str, i64, Option<i64>); 4] = [
    ("0-1MB", 0, Some(BYTES_PER_MB)),
    ("1-5MB", BYTES_PER_MB, Some(5 * BYTES_PER_MB)),
    ("5-20MB", 5 * BYTES_PER_MB, Some(LARGE_FILE_BYTES)),
    ("20MB+", LARGE_FILE_BYTES, None),
];

fn round_mb(bytes: i64) -> f64 {
    (bytes as f64 / BYTES_PER_MB as f64 * 100.0).round() / 100.0
}

impl QuotaDetailsResponse {
    pub fn build(quota: UserQuota, scores: &[ScoreUsage]) -> Self {
        let size_breakdown = SIZE_BUCKETS
            .iter()
            .map(|(range, min, max)| {
                let in_bucket = scores
                    .iter()
                    .filter(|s| s.size_bytes >= *min && max.map_or(true, |max| s.size_bytes < max));
                let (count, total) = in_bucket.fold((0i64, 0i64), |(count, total), s| {
                    (count + 1, total + s.size_bytes)
                });
                SizeBucket {
                    range: range.to_string(),
                    count,
                    total_size_mb: round_mb(total),
                }
            })
            .collect();

        let mut recommendations = Vec::new();

        let large_files = scores
            .iter()
            .filter(|s| s.size_bytes > LARGE_FILE_BYTES)
            .count();
        if large_files > 0 {
            recommendations.push(QuotaRecommendation {
                kind: "large_files".to_string(),
                message: format!(
                    "You have {} files larger than 20MB. Consider optimizing these PDFs.",
                    large_files
                ),
                action: "Review large files".to_string(),
            });
        }

        let missing_thumbnails = scores.iter().filter(|s| !s.has_thumbnail).count();
        if missing_thumbnails > 0 {
            recommendations.push(QuotaRecommendation {
                kind: "missing_thumbnails".to_string(),
                message: format!(
                    "{} scores are missing thumbnails. Generate them for better performance.",
                    missing_thumbnails
                ),
                action: "Generate thumbnails".to_string(),
            });
        }

        let usage = quota.usage_percentage();
        if usage > HIGH_USAGE_PERCENT {
            recommendations.push(QuotaRecommendation {
                kind: "high_usage".to_string(),
                message: format!(
                    "You're using {:.1}% of your quota. Consider upgrading your plan.",
                    usage
                ),
                action: "Upgrade plan".to_string(),
            });
        }

        Self {
            quota_summary: quota.into(),
            size_breakdown,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(total_mb: i64, used_mb: i64) -> UserQuota {
        UserQuota {
            user_id: Uuid::new_v4(),
            total_mb,
            used_mb,
        }
    }

    #[test]
    fn available_never_negative() {
        assert_eq!(quota(200, 0).available_mb(), 200);
        assert_eq!(quota(200, 150).available_mb(), 50);
        assert_eq!(quota(200, 300).available_mb(), 0);
    }

    #[test]
    fn usage_percentage_handles_zero_total_and_overshoot() {
        assert_eq!(quota(0, 10).usage_percentage(), 0.0);
        assert_eq!(quota(200, 50).usage_percentage(), 25.0);
        assert_eq!(quota(200, 300).usage_percentage(), 150.0);
    }

    #[test]
    fn charged_mb_floors() {
        assert_eq!(bytes_to_charged_mb(50 * BYTES_PER_MB), 50);
        assert_eq!(bytes_to_charged_mb(BYTES_PER_MB - 1), 0);
        assert_eq!(bytes_to_charged_mb(3 * BYTES_PER_MB + 17), 3);
    }

    #[test]
    fn required_mb_rounds_up() {
        assert_eq!(bytes_to_required_mb(10 * BYTES_PER_MB), 10);
        assert_eq!(bytes_to_required_mb(10 * BYTES_PER_MB + 1), 11);
        assert_eq!(bytes_to_required_mb(1), 1);
    }

    #[test]
    fn can_upload_compares_fractional_megabytes() {
        let q = quota(200, 199);
        assert!(q.can_upload(BYTES_PER_MB));
        assert!(!q.can_upload(BYTES_PER_MB + 1));
        assert!(!q.can_upload(10 * BYTES_PER_MB));
    }

    #[test]
    fn details_bucket_sizes_and_recommend() {
        let scores = [
            ScoreUsage {
                size_bytes: BYTES_PER_MB / 2,
                has_thumbnail: true,
            },
            ScoreUsage {
                size_bytes: 3 * BYTES_PER_MB,
                has_thumbnail: false,
            },
            ScoreUsage {
                size_bytes: 25 * BYTES_PER_MB,
                has_thumbnail: true,
            },
        ];
        let details = QuotaDetailsResponse::build(quota(30, 28), &scores);

        let counts: Vec<i64> = details.size_breakdown.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 1]);
        assert_eq!(details.size_breakdown[3].total_size_mb, 25.0);

        let kinds: Vec<&str> = details
            .recommendations
            .iter()
            .map(|r| r.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["large_files", "missing_thumbnails", "high_usage"]);
        assert_eq!(details.quota_summary.available_mb, 2);
    }
}
