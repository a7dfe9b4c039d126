//! Configuration module
//!
//! Server, database, storage, upload and worker settings, read from the
//! environment (with `.env` support). Unparseable numeric values fall back to
//! their defaults; inconsistent combinations are rejected by `validate()`.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const HTTP_RATE_LIMIT_PER_MINUTE: u32 = 120;
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
const HTTP_CONCURRENCY_LIMIT: usize = 256;

const MAX_UPLOAD_SIZE_MB: i64 = 100;
const DEFAULT_QUOTA_MB: i64 = 200;
const RESERVATION_TTL_SECS: i64 = 300;
const PRESIGNED_URL_EXPIRY_SECS: u64 = 3600;
const INTERNAL_URL_EXPIRY_SECS: u64 = 600;

const TASK_QUEUE_MAX_WORKERS: usize = 4;
const TASK_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const TASK_QUEUE_DEFAULT_TIMEOUT_SECS: i32 = 600;
const TASK_QUEUE_MAX_RETRIES: i32 = 3;
const STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
const STALE_TASK_GRACE_PERIOD_SECS: i64 = 300;
const RESERVATION_SWEEP_INTERVAL_SECS: u64 = 60;

const THUMBNAIL_WIDTH: u32 = 300;
const THUMBNAIL_HEIGHT: u32 = 400;
const THUMBNAIL_QUALITY: u8 = 85;

/// Where repositories keep their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Postgres,
    /// Process-local state; for development and tests only.
    Memory,
}

impl FromStr for DatabaseBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseBackend::Postgres),
            "memory" => Ok(DatabaseBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid database backend: {}", s)),
        }
    }
}

impl Display for DatabaseBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DatabaseBackend::Postgres => write!(f, "postgres"),
            DatabaseBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Where HTTP rate-limit counters live. `Postgres` shares them across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Postgres,
}

impl FromStr for RateLimitBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RateLimitBackend::Memory),
            "postgres" | "postgresql" => Ok(RateLimitBackend::Postgres),
            _ => Err(anyhow::anyhow!("Invalid rate limit backend: {}", s)),
        }
    }
}

/// HTTP server settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub jwt_secret: String,
    pub http_rate_limit_per_minute: u32,
    pub rate_limit_backend: RateLimitBackend,
    pub max_request_body_bytes: usize,
    pub http_concurrency_limit: usize,
    pub environment: String,
}

/// Largest accepted `MAX_UPLOAD_SIZE_MB` (1 TiB).
pub const MAX_UPLOAD_SIZE_MB_LIMIT: i64 = 1024 * 1024;

/// Upload and quota settings
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// System-wide ceiling on a single declared upload, independent of quota.
    pub max_upload_size_mb: i64,
    pub allowed_mime_types: Vec<String>,
    pub reservation_ttl_secs: i64,
    /// Expiry of signed URLs handed to clients.
    pub presigned_url_expiry_secs: u64,
    /// Expiry of signed URLs the workers use to fetch originals.
    pub internal_url_expiry_secs: u64,
    pub default_quota_mb: i64,
}

impl UploadConfig {
    pub fn max_upload_size_bytes(&self) -> i64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    /// Lifetime of an upload URL. It never outlives the reservation it was
    /// issued for.
    pub fn upload_url_expiry_secs(&self) -> u64 {
        let ttl = u64::try_from(self.reservation_ttl_secs).unwrap_or(0);
        self.presigned_url_expiry_secs.min(ttl)
    }

    pub fn is_mime_allowed(&self, mime: &str) -> bool {
        let mime = mime.trim().to_lowercase();
        self.allowed_mime_types.iter().any(|allowed| *allowed == mime)
    }
}

/// Background worker settings
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_seconds: i32,
    pub max_retries: i32,
    /// 0 disables the stale task reaper.
    pub stale_task_reap_interval_secs: u64,
    pub stale_task_grace_period_secs: i64,
    /// 0 disables the expired reservation sweeper.
    pub reservation_sweep_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: TASK_QUEUE_MAX_WORKERS,
            poll_interval_ms: TASK_QUEUE_POLL_INTERVAL_MS,
            default_timeout_seconds: TASK_QUEUE_DEFAULT_TIMEOUT_SECS,
            max_retries: TASK_QUEUE_MAX_RETRIES,
            stale_task_reap_interval_secs: STALE_TASK_REAP_INTERVAL_SECS,
            stale_task_grace_period_secs: STALE_TASK_GRACE_PERIOD_SECS,
            reservation_sweep_interval_secs: RESERVATION_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Thumbnail rendering settings
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub pdftoppm_path: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_quality: u8,
}

#[derive(Clone, Debug)]
pub struct ScoremateConfig {
    pub base: BaseConfig,
    pub database_backend: DatabaseBackend,
    pub database_url: String,
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub s3_endpoint: Option<String>,
    pub aws_region: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub upload: UploadConfig,
    pub worker: WorkerConfig,
    pub render: RenderConfig,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<ScoremateConfig>);

impl Config {
    fn inner(&self) -> &ScoremateConfig {
        &self.0
    }

    pub fn is_production(&self) -> bool {
        self.inner().is_production()
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = ScoremateConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn jwt_secret(&self) -> &str {
        &self.inner().base.jwt_secret
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn http_rate_limit_per_minute(&self) -> u32 {
        self.inner().base.http_rate_limit_per_minute
    }

    pub fn rate_limit_backend(&self) -> RateLimitBackend {
        self.inner().base.rate_limit_backend
    }

    pub fn max_request_body_bytes(&self) -> usize {
        self.inner().base.max_request_body_bytes
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.inner().base.http_concurrency_limit
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn database_backend(&self) -> DatabaseBackend {
        self.inner().database_backend
    }

    pub fn database_url(&self) -> &str {
        &self.inner().database_url
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    /// S3_REGION wins over AWS_REGION
    pub fn s3_region(&self) -> Option<&str> {
        self.inner()
            .s3_region
            .as_deref()
            .or(self.inner().aws_region.as_deref())
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn upload(&self) -> &UploadConfig {
        &self.inner().upload
    }

    pub fn worker(&self) -> &WorkerConfig {
        &self.inner().worker
    }

    pub fn render(&self) -> &RenderConfig {
        &self.inner().render
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ScoremateConfig {
    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let database_backend = match non_empty_env("DATABASE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => DatabaseBackend::Postgres,
        };

        let database_url = match database_backend {
            DatabaseBackend::Postgres => env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            DatabaseBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let storage_backend = match non_empty_env("STORAGE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => StorageBackend::S3,
        };

        let rate_limit_backend = match non_empty_env("RATE_LIMIT_BACKEND") {
            Some(raw) => raw.parse()?,
            None => RateLimitBackend::Memory,
        };

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: parse_env("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set for authentication"))?,
            http_rate_limit_per_minute: parse_env(
                "HTTP_RATE_LIMIT_PER_MINUTE",
                HTTP_RATE_LIMIT_PER_MINUTE,
            ),
            rate_limit_backend,
            max_request_body_bytes: parse_env("MAX_REQUEST_BODY_BYTES", MAX_REQUEST_BODY_BYTES),
            http_concurrency_limit: parse_env("HTTP_CONCURRENCY_LIMIT", HTTP_CONCURRENCY_LIMIT),
            environment,
        };

        let upload = UploadConfig {
            max_upload_size_mb: parse_env("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB),
            allowed_mime_types: split_list(
                &env::var("ALLOWED_MIME_TYPES").unwrap_or_else(|_| "application/pdf".to_string()),
            ),
            reservation_ttl_secs: parse_env("RESERVATION_TTL_SECS", RESERVATION_TTL_SECS),
            presigned_url_expiry_secs: parse_env(
                "PRESIGNED_URL_EXPIRY_SECS",
                PRESIGNED_URL_EXPIRY_SECS,
            ),
            internal_url_expiry_secs: parse_env(
                "INTERNAL_URL_EXPIRY_SECS",
                INTERNAL_URL_EXPIRY_SECS,
            ),
            default_quota_mb: parse_env("DEFAULT_QUOTA_MB", DEFAULT_QUOTA_MB),
        };

        let worker = WorkerConfig {
            max_workers: parse_env("TASK_WORKER_COUNT", TASK_QUEUE_MAX_WORKERS),
            poll_interval_ms: parse_env("TASK_POLL_INTERVAL_MS", TASK_QUEUE_POLL_INTERVAL_MS),
            default_timeout_seconds: parse_env("TASK_TIMEOUT_SECS", TASK_QUEUE_DEFAULT_TIMEOUT_SECS),
            max_retries: parse_env("TASK_MAX_RETRIES", TASK_QUEUE_MAX_RETRIES),
            stale_task_reap_interval_secs: parse_env(
                "TASK_STALE_REAP_INTERVAL_SECS",
                STALE_TASK_REAP_INTERVAL_SECS,
            ),
            stale_task_grace_period_secs: parse_env(
                "TASK_STALE_GRACE_PERIOD_SECS",
                STALE_TASK_GRACE_PERIOD_SECS,
            ),
            reservation_sweep_interval_secs: parse_env(
                "RESERVATION_SWEEP_INTERVAL_SECS",
                RESERVATION_SWEEP_INTERVAL_SECS,
            ),
        };

        let render = RenderConfig {
            pdftoppm_path: env::var("PDFTOPPM_PATH").unwrap_or_else(|_| "pdftoppm".to_string()),
            thumbnail_width: parse_env("THUMBNAIL_WIDTH", THUMBNAIL_WIDTH),
            thumbnail_height: parse_env("THUMBNAIL_HEIGHT", THUMBNAIL_HEIGHT),
            thumbnail_quality: parse_env("THUMBNAIL_QUALITY", THUMBNAIL_QUALITY),
        };

        let config = ScoremateConfig {
            base,
            database_backend,
            database_url,
            storage_backend,
            s3_bucket: non_empty_env("S3_BUCKET"),
            s3_region: non_empty_env("S3_REGION"),
            s3_endpoint: non_empty_env("S3_ENDPOINT"),
            aws_region: non_empty_env("AWS_REGION"),
            local_storage_path: non_empty_env("LOCAL_STORAGE_PATH"),
            local_storage_base_url: non_empty_env("LOCAL_STORAGE_BASE_URL"),
            upload,
            worker,
            render,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.base.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long"
            ));
        }

        if self.database_backend == DatabaseBackend::Postgres
            && !(self.database_url.starts_with("postgresql://")
                || self.database_url.starts_with("postgres://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.is_production()
            && (self.database_backend == DatabaseBackend::Memory
                || self.storage_backend == StorageBackend::Memory)
        {
            return Err(anyhow::anyhow!(
                "In-memory database or storage backends cannot be used in production"
            ));
        }

        if self.base.rate_limit_backend == RateLimitBackend::Postgres
            && self.database_backend != DatabaseBackend::Postgres
        {
            return Err(anyhow::anyhow!(
                "RATE_LIMIT_BACKEND=postgres requires DATABASE_BACKEND=postgres"
            ));
        }

        if self.upload.max_upload_size_mb <= 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be positive"));
        }

        if self.upload.max_upload_size_mb > MAX_UPLOAD_SIZE_MB_LIMIT {
            return Err(anyhow::anyhow!(
                "MAX_UPLOAD_SIZE_MB cannot exceed {}",
                MAX_UPLOAD_SIZE_MB_LIMIT
            ));
        }

        if self.upload.allowed_mime_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_MIME_TYPES must list at least one media type"
            ));
        }

        if self.upload.reservation_ttl_secs <= 0 {
            return Err(anyhow::anyhow!("RESERVATION_TTL_SECS must be positive"));
        }

        if self.upload.default_quota_mb < 0 {
            return Err(anyhow::anyhow!("DEFAULT_QUOTA_MB cannot be negative"));
        }

        if self.render.thumbnail_quality == 0 || self.render.thumbnail_quality > 100 {
            return Err(anyhow::anyhow!("THUMBNAIL_QUALITY must be between 1 and 100"));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() && self.aws_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {}
        }

        Ok(())
    }

    /// Development defaults with in-memory backends; used by tests and local tooling.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        ScoremateConfig {
            base: BaseConfig {
                server_port: SERVER_PORT,
                cors_origins: vec!["*".to_string()],
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                jwt_secret: jwt_secret.into(),
                http_rate_limit_per_minute: HTTP_RATE_LIMIT_PER_MINUTE,
                rate_limit_backend: RateLimitBackend::Memory,
                max_request_body_bytes: MAX_REQUEST_BODY_BYTES,
                http_concurrency_limit: HTTP_CONCURRENCY_LIMIT,
                environment: "development".to_string(),
            },
            database_backend: DatabaseBackend::Memory,
            database_url: String::new(),
            storage_backend: StorageBackend::Memory,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            aws_region: None,
            local_storage_path: None,
            local_storage_base_url: None,
            upload: UploadConfig {
                max_upload_size_mb: MAX_UPLOAD_SIZE_MB,
                allowed_mime_types: vec!["application/pdf".to_string()],
                reservation_ttl_secs: RESERVATION_TTL_SECS,
                presigned_url_expiry_secs: PRESIGNED_URL_EXPIRY_SECS,
                internal_url_expiry_secs: INTERNAL_URL_EXPIRY_SECS,
                default_quota_mb: DEFAULT_QUOTA_MB,
            },
            worker: WorkerConfig::default(),
            render: RenderConfig {
                pdftoppm_path: "pdftoppm".to_string(),
                thumbnail_width: THUMBNAIL_WIDTH,
                thumbnail_height: THUMBNAIL_HEIGHT,
                thumbnail_quality: THUMBNAIL_QUALITY,
            },
        }
    }
}
