//! Scoremate persistence layer
//!
//! Repository traits for the quota ledger, upload reservations, score records,
//! background tasks and shared rate-limit counters, each with a PostgreSQL
//! implementation and a process-local one for development and tests.

pub mod db;

pub use db::*;
