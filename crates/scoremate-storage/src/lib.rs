//! Scoremate Storage Library
//!
//! The object storage gateway: signed URLs for client-direct PUT/GET, object
//! deletion, and the byte-level reads and writes the background workers need.
//! Backends: S3 (and S3-compatible providers) via `object_store`, the local
//! filesystem, and an in-memory store for development and tests.
//!
//! # Key layout
//!
//! All keys are namespaced by the owning user; see [`keys`]. Keys must not
//! contain `..` or a leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::InMemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use scoremate_core::StorageBackend;
pub use traits::{DeleteOutcome, SignedUrl, Storage, StorageError, StorageResult};
