use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::score::ScoreMetadata;

const MAX_TAG_LENGTH: usize = 50;

/// Request for a signed direct-to-storage upload URL
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UploadUrlRequest {
    /// Original filename, used only to pick the object extension
    #[validate(length(max = 255, message = "Filename must be at most 255 characters"))]
    pub filename: Option<String>,
    /// Declared file size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub size_bytes: i64,
    /// Declared content type
    #[validate(length(
        min = 1,
        max = 100,
        message = "MIME type must be between 1 and 100 characters"
    ))]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UploadUrlResponse {
    /// Reservation identifier to confirm or cancel
    pub upload_id: Uuid,
    /// Signed URL the client uploads to directly
    pub upload_url: String,
    pub s3_key: String,
    /// Headers the client must send with the upload
    pub headers: HashMap<String, String>,
    /// Seconds until the upload URL expires
    pub expires_in: u64,
    pub method: String,
}

fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_LENGTH) {
        let mut err = ValidationError::new("tag_length");
        err.message = Some("Each tag must be at most 50 characters".into());
        return Err(err);
    }
    Ok(())
}

/// Request to turn a finished upload into a score
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UploadConfirmRequest {
    pub upload_id: Uuid,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Title must be between 1 and 255 characters"
    ))]
    pub title: String,
    #[validate(length(max = 255, message = "Composer must be at most 255 characters"))]
    pub composer: Option<String>,
    #[validate(length(max = 255, message = "Instrumentation must be at most 255 characters"))]
    pub instrumentation: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_tags"))]
    pub tags: Vec<String>,
}

impl UploadConfirmRequest {
    pub fn metadata(&self) -> ScoreMetadata {
        ScoreMetadata {
            title: self.title.trim().to_string(),
            composer: self
                .composer
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            instrumentation: self
                .instrumentation
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            tags: self
                .tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadConfirmResponse {
    pub message: String,
    pub upload_id: Uuid,
    pub score_id: Uuid,
    /// Megabytes charged for this upload
    pub quota_used_mb: i64,
    pub remaining_quota_mb: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadCancelRequest {
    pub upload_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadCancelResponse {
    pub message: String,
    pub upload_id: Uuid,
}
