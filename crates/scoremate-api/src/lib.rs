//! Scoremate API Library
//!
//! HTTP handlers, middleware, background task handlers and application setup
//! for the sheet-music upload service.

mod api_doc;
pub mod constants;
mod handlers;
pub mod middleware;
pub mod services;
pub mod setup;
pub mod task_handlers;
pub mod telemetry;
mod utils;

pub mod auth;
pub mod error;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use scoremate_worker::TaskQueue;
