//! Scoremate Core Library
//!
//! Domain models, error types and configuration shared by every Scoremate
//! component: the quota ledger, upload reservations, score records and the
//! background task model.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use task_error::TaskError;
