//! Repositories for the upload protocol and background tasks.
//!
//! Each store is a trait with a PostgreSQL implementation; `InMemoryRepository`
//! implements all of them for single-process and test setups.

pub mod memory;
pub mod quota;
pub mod rate_limit;
pub mod reservation;
pub mod score;
pub mod task;
pub mod upload;

use sqlx::PgPool;
use std::sync::Arc;

pub use memory::InMemoryRepository;
pub use quota::{PostgresQuotaLedger, QuotaLedger};
pub use rate_limit::{PostgresRateLimitStore, RateLimitDecision, RateLimitStore};
pub use reservation::{PostgresReservationStore, ReservationStore};
pub use score::{PostgresScoreStore, ScoreStore};
pub use task::{PostgresTaskStore, TaskStore, TASK_NOTIFY_CHANNEL};
pub use upload::{CommittedUpload, PostgresUploadCommitter, ReleasedScore, UploadCommitter};

/// The set of stores the service runs against.
#[derive(Clone)]
pub struct Repositories {
    pub quota: Arc<dyn QuotaLedger>,
    pub reservations: Arc<dyn ReservationStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub uploads: Arc<dyn UploadCommitter>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            quota: Arc::new(PostgresQuotaLedger::new(pool.clone())),
            reservations: Arc::new(PostgresReservationStore::new(pool.clone())),
            scores: Arc::new(PostgresScoreStore::new(pool.clone())),
            uploads: Arc::new(PostgresUploadCommitter::new(pool.clone())),
            tasks: Arc::new(PostgresTaskStore::new(pool)),
        }
    }

    pub fn in_memory(repo: InMemoryRepository) -> Self {
        Self {
            quota: Arc::new(repo.clone()),
            reservations: Arc::new(repo.clone()),
            scores: Arc::new(repo.clone()),
            uploads: Arc::new(repo.clone()),
            tasks: Arc::new(repo),
        }
    }
}
