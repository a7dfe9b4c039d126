//! Data models
//!
//! One sub-module per feature area; everything is re-exported here.

mod download;
mod quota;
mod reservation;
mod score;
mod task;
mod upload;

pub use download::*;
pub use quota::*;
pub use reservation::*;
pub use score::*;
pub use task::*;
pub use upload::*;
