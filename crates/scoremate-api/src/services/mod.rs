pub mod score_lifecycle;
pub mod upload_coordinator;

pub use score_lifecycle::ScoreLifecycle;
pub use upload_coordinator::UploadCoordinator;
