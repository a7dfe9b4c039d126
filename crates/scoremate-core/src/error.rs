//! Error types module
//!
//! All request-level failures are unified under [`AppError`]. Each variant
//! describes its own HTTP presentation through [`ErrorMetadata`], so the API
//! layer never has to match on variants to pick a status code.
//!
//! The `Database` variant wraps `sqlx::Error` when the `sqlx` feature is on.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors like validation failures
    Debug,
    /// Recoverable issues and client-caused limits
    Warn,
    /// Unexpected failures
    Error,
}

/// Metadata for error responses. Errors self-describe how they are presented.
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "QUOTA_EXCEEDED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error(
        "Quota exceeded: {required_mb} MB required, {available_mb} MB available ({used_mb}/{total_mb} MB used)"
    )]
    QuotaExceeded {
        required_mb: i64,
        available_mb: i64,
        used_mb: i64,
        total_mb: i64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("File too large: {size_bytes} bytes exceeds the {max_bytes} byte limit")]
    FileTooLarge { size_bytes: i64, max_bytes: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload reservation not found or expired")]
    ReservationExpiredOrMissing,

    #[error("Storage gateway error: {0}")]
    StorageGateway(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Repositories wrap sqlx errors in anyhow context; keep them classified as database errors.
        #[cfg(feature = "sqlx")]
        let err = match err.downcast::<SqlxError>() {
            Ok(db) => return AppError::Database(db),
            Err(other) => other,
        };
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Static metadata per variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::QuotaExceeded { .. } => (
            413,
            "QUOTA_EXCEEDED",
            false,
            Some("Delete existing scores or upgrade your storage plan"),
            false,
            LogLevel::Warn,
        ),
        AppError::Validation(_) => (
            400,
            "VALIDATION_ERROR",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedMediaType(_) => (
            400,
            "UNSUPPORTED_MEDIA_TYPE",
            false,
            Some("Upload a PDF document"),
            false,
            LogLevel::Debug,
        ),
        AppError::FileTooLarge { .. } => (
            400,
            "FILE_TOO_LARGE",
            false,
            Some("Reduce the file size below the upload limit"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the resource ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::ReservationExpiredOrMissing => (
            400,
            "RESERVATION_NOT_FOUND",
            false,
            Some("Request a new upload URL and upload again"),
            false,
            LogLevel::Debug,
        ),
        AppError::StorageGateway(_) => (
            502,
            "STORAGE_GATEWAY_ERROR",
            true,
            Some("Retry the request with a fresh upload reservation"),
            true,
            LogLevel::Error,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Check the authentication token"),
            false,
            LogLevel::Debug,
        ),
        AppError::RateLimited { .. } => (
            429,
            "RATE_LIMIT_EXCEEDED",
            true,
            Some("Wait before sending more requests"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Error type name used in detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::QuotaExceeded { .. } => "QuotaExceeded",
            AppError::Validation(_) => "ValidationError",
            AppError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            AppError::FileTooLarge { .. } => "FileTooLarge",
            AppError::NotFound(_) => "NotFound",
            AppError::ReservationExpiredOrMissing => "ReservationExpiredOrMissing",
            AppError::StorageGateway(_) => "StorageGatewayError",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::RateLimited { .. } => "RateLimited",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Structured details a client can act on, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::QuotaExceeded {
                required_mb,
                available_mb,
                used_mb,
                total_mb,
            } => Some(serde_json::json!({
                "required_mb": required_mb,
                "available_mb": available_mb,
                "used_mb": used_mb,
                "total_mb": total_mb,
            })),
            AppError::FileTooLarge {
                size_bytes,
                max_bytes,
            } => Some(serde_json::json!({
                "size_bytes": size_bytes,
                "max_bytes": max_bytes,
            })),
            AppError::RateLimited { retry_after_secs } => Some(serde_json::json!({
                "retry_after_secs": retry_after_secs,
            })),
            _ => None,
        }
    }

    /// Error message including the source chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::QuotaExceeded {
                required_mb,
                available_mb,
                ..
            } => format!(
                "Storage quota exceeded: {} MB required, {} MB available",
                required_mb, available_mb
            ),
            AppError::Validation(ref msg) => msg.clone(),
            AppError::UnsupportedMediaType(ref mime) => {
                format!("Media type '{}' is not allowed", mime)
            }
            AppError::FileTooLarge { max_bytes, .. } => format!(
                "File exceeds the maximum upload size of {} MB",
                max_bytes / (1024 * 1024)
            ),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::ReservationExpiredOrMissing => {
                "Upload reservation not found or expired".to_string()
            }
            AppError::StorageGateway(_) => "Failed to access object storage".to_string(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::RateLimited { retry_after_secs } => format!(
                "Too many requests, retry after {} seconds",
                retry_after_secs
            ),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}
