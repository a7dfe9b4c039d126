//! Background processing for Scoremate.
//!
//! [`TaskQueue`] runs a bounded worker pool over the task table, waking on
//! Postgres NOTIFY or on a poll interval; [`sweeper`] removes expired upload
//! reservations on a timer.

pub mod context;
pub mod queue;
pub mod sweeper;

pub use context::TaskHandlerContext;
pub use queue::{TaskQueue, MAX_RETRY_BACKOFF_SECS};
