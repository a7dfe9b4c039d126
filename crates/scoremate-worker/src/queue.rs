//! Task queue: worker pool, LISTEN/NOTIFY or polling, retry, and submission.
//!
//! [`TaskQueue::shutdown`] stops the pool from claiming; it does not wait for
//! in-flight tasks. A task interrupted by process exit stays `running` until the
//! stale task reaper returns it to `pending`.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use scoremate_core::config::WorkerConfig;
use scoremate_core::models::{NewTask, Task, TaskPayload};
use scoremate_core::TaskError;
use scoremate_db::{ReservationStore, TaskStore, TASK_NOTIFY_CHANNEL};

use crate::context::TaskHandlerContext;
use crate::sweeper;

/// Maximum delay in seconds before retrying a failed task.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .saturating_pow(retry_count.max(0) as u32)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: WorkerConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Start the worker pool and return a handle for submitting tasks.
    ///
    /// With a `pool` the workers LISTEN on [`TASK_NOTIFY_CHANNEL`] and wake as
    /// soon as a task is created; otherwise they only poll. When `reservations`
    /// is given, expired upload reservations are swept on the configured interval.
    pub fn new(
        store: Arc<dyn TaskStore>,
        config: WorkerConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
        reservations: Option<Arc<dyn ReservationStore>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker_store = store.clone();
        let worker_config = config.clone();
        tokio::spawn(async move {
            Self::worker_pool(
                worker_store,
                worker_config,
                context,
                shutdown_rx,
                pool,
                reservations,
            )
            .await;
        });

        Self {
            store,
            config,
            shutdown_tx,
        }
    }

    /// A queue that only writes tasks. Whatever worker shares the store picks them up.
    pub fn new_no_worker(store: Arc<dyn TaskStore>, config: WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            store,
            config,
            shutdown_tx,
        }
    }

    /// Enqueue a typed payload with the queue's retry and timeout defaults.
    #[tracing::instrument(skip(self, payload), fields(task_type = %P::task_type()))]
    pub async fn submit_task<P: TaskPayload>(&self, user_id: Uuid, payload: &P) -> Result<Uuid> {
        let new_task = NewTask::from_payload(user_id, payload, self.config.max_retries)
            .context("Failed to serialize task payload")?;
        self.submit(new_task).await
    }

    pub async fn submit(&self, mut new_task: NewTask) -> Result<Uuid> {
        if new_task.timeout_seconds.is_none() {
            new_task.timeout_seconds = Some(self.config.default_timeout_seconds);
        }
        let task_type = new_task.task_type;
        let priority = new_task.priority.as_i32();
        let user_id = new_task.user_id;

        let task = self.store.create_task(new_task).await.map_err(|e| {
            tracing::error!(
                error = %e,
                user_id = %user_id,
                task_type = %task_type,
                priority,
                "Failed to create task"
            );
            e
        })?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            priority,
            "Task submitted to queue"
        );
        Ok(task.id)
    }

    async fn worker_pool(
        store: Arc<dyn TaskStore>,
        config: WorkerConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
        reservations: Option<Arc<dyn ReservationStore>>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = pool.is_some(),
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms.max(10));
        let default_timeout = config.default_timeout_seconds;

        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            tokio::spawn(Self::listen_for_new_tasks(pool, notify_tx));
        }

        let (background_shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        if config.stale_task_reap_interval_secs > 0 {
            let reaper_store = store.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            let mut stop = background_shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reaper_store.reap_stale_running_tasks(grace_period).await {
                                tracing::error!(error = %e, "Stale task reaper failed");
                            }
                        }
                        _ = stop.recv() => break,
                    }
                }
            });
        }

        if let Some(reservations) = reservations {
            if config.reservation_sweep_interval_secs > 0 {
                tokio::spawn(sweeper::run(
                    reservations,
                    Duration::from_secs(config.reservation_sweep_interval_secs),
                    background_shutdown_tx.subscribe(),
                ));
            }
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = background_shutdown_tx.send(());
                    break;
                }
                Some(()) = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&store, &semaphore, &context, default_timeout).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&store, &semaphore, &context, default_timeout).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    async fn listen_for_new_tasks(pool: sqlx::PgPool, tx: mpsc::Sender<()>) {
        loop {
            match sqlx::postgres::PgListener::connect_with(&pool).await {
                Ok(mut listener) => {
                    if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                        tracing::warn!(error = %e, "LISTEN failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    while listener.recv().await.is_ok() {
                        // Full channel means a wakeup is already pending.
                        let _ = tx.try_send(());
                    }
                    tracing::warn!("Task notification listener disconnected, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn claim_and_dispatch_one(
        store: &Arc<dyn TaskStore>,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
        default_timeout_seconds: i32,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match store.claim_next_task().await {
            Ok(Some(task)) => {
                let store = store.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) =
                        Self::process_task(task, store.as_ref(), &ctx, default_timeout_seconds)
                            .await
                    {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                tracing::trace!("No tasks available in queue");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    /// Run one claimed task to a terminal state or a scheduled retry.
    #[tracing::instrument(skip(store, context), fields(task.id = %task.id, task.type = %task.task_type))]
    pub(crate) async fn process_task(
        task: Task,
        store: &dyn TaskStore,
        context: &Weak<dyn TaskHandlerContext>,
        default_timeout_seconds: i32,
    ) -> Result<()> {
        let ctx = match context.upgrade() {
            Some(ctx) => ctx,
            None => {
                // Leave the task for the reaper; another process may still run it.
                return Err(anyhow::anyhow!(
                    "TaskHandlerContext was dropped, cannot process task"
                ));
            }
        };

        let timeout_secs = task
            .timeout_seconds
            .unwrap_or(default_timeout_seconds)
            .max(1) as u64;
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(Duration::from_secs(timeout_secs), ctx.dispatch_task(&task)).await;

        match outcome {
            Ok(Ok(result)) => {
                store
                    .mark_completed(task.id, result)
                    .await
                    .context("Failed to mark task as completed")?;
                tracing::info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task completed successfully"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                let unrecoverable = TaskError::is_unrecoverable(&e);
                tracing::error!(
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable,
                    "Task execution failed"
                );
                if !unrecoverable && task.can_retry() {
                    Self::retry_later(store, &task, &e.to_string()).await
                } else {
                    store
                        .mark_failed(task.id, &e.to_string())
                        .await
                        .context("Failed to mark task as failed")?;
                    Err(e)
                }
            }
            Err(_) => {
                let message = format!("Task execution timed out after {}s", timeout_secs);
                tracing::error!(timeout_seconds = timeout_secs, "Task execution timed out");
                if task.can_retry() {
                    Self::retry_later(store, &task, &message).await
                } else {
                    store
                        .mark_failed(task.id, &message)
                        .await
                        .context("Failed to mark task as failed")?;
                    Err(anyhow::anyhow!(message))
                }
            }
        }
    }

    async fn retry_later(store: &dyn TaskStore, task: &Task, error: &str) -> Result<()> {
        let backoff_seconds = compute_retry_backoff_seconds(task.retry_count);
        tracing::info!(
            retry_count = task.retry_count + 1,
            backoff_seconds,
            "Scheduling task retry"
        );
        store
            .schedule_retry(task.id, backoff_seconds, error)
            .await
            .context("Failed to schedule task retry")?;
        Ok(())
    }

    /// Signals the worker pool to stop claiming tasks; returns without waiting.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scoremate_core::models::{ProcessPdfInfoPayload, TaskStatus};
    use scoremate_db::InMemoryRepository;

    struct ScriptedContext {
        outcome: fn() -> Result<serde_json::Value>,
        delay: Duration,
    }

    #[async_trait]
    impl TaskHandlerContext for ScriptedContext {
        async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            (self.outcome)()
        }
    }

    fn context(
        outcome: fn() -> Result<serde_json::Value>,
        delay: Duration,
    ) -> Arc<dyn TaskHandlerContext> {
        Arc::new(ScriptedContext { outcome, delay })
    }

    async fn claimed_task(repo: &InMemoryRepository, max_retries: i32, timeout: i32) -> Task {
        let queue = TaskQueue::new_no_worker(
            Arc::new(repo.clone()),
            WorkerConfig {
                max_retries,
                default_timeout_seconds: timeout,
                ..WorkerConfig::default()
            },
        );
        queue
            .submit_task(
                Uuid::new_v4(),
                &ProcessPdfInfoPayload {
                    score_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap();
        repo.claim_next_task().await.unwrap().unwrap()
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(40), MAX_RETRY_BACKOFF_SECS);
    }

    #[tokio::test]
    async fn submit_applies_queue_defaults() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 5, 42).await;
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.timeout_seconds, Some(42));
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn success_marks_task_completed() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 3, 60).await;
        let ctx = context(|| Ok(serde_json::json!({ "pages": 4 })), Duration::ZERO);

        TaskQueue::process_task(task, &repo, &Arc::downgrade(&ctx), 60)
            .await
            .unwrap();

        let task = &repo.tasks()[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_ref().unwrap()["pages"], 4);
    }

    #[tokio::test]
    async fn recoverable_failure_is_rescheduled() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 3, 60).await;
        let ctx = context(|| Err(anyhow::anyhow!("storage timeout")), Duration::ZERO);

        TaskQueue::process_task(task, &repo, &Arc::downgrade(&ctx), 60)
            .await
            .unwrap();

        let task = &repo.tasks()[0];
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.scheduled_at > task.created_at);
        assert_eq!(task.last_error.as_deref(), Some("storage timeout"));
    }

    #[tokio::test]
    async fn unrecoverable_failure_skips_retries() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 3, 60).await;
        let ctx = context(
            || Err(TaskError::unrecoverable(anyhow::anyhow!("page 9 exceeds page count 4")).into()),
            Duration::ZERO,
        );

        assert!(TaskQueue::process_task(task, &repo, &Arc::downgrade(&ctx), 60)
            .await
            .is_err());

        let task = &repo.tasks()[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 0, 60).await;
        let ctx = context(|| Err(anyhow::anyhow!("still broken")), Duration::ZERO);

        assert!(TaskQueue::process_task(task, &repo, &Arc::downgrade(&ctx), 60)
            .await
            .is_err());
        assert_eq!(repo.tasks()[0].status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_a_failed_attempt() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 0, 1).await;
        let ctx = context(|| Ok(serde_json::Value::Null), Duration::from_secs(30));

        let err = TaskQueue::process_task(task, &repo, &Arc::downgrade(&ctx), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(repo.tasks()[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn dropped_context_leaves_task_running() {
        let repo = InMemoryRepository::new();
        let task = claimed_task(&repo, 3, 60).await;
        let weak = Arc::downgrade(&context(|| Ok(serde_json::Value::Null), Duration::ZERO));

        assert!(TaskQueue::process_task(task, &repo, &weak, 60).await.is_err());
        assert_eq!(repo.tasks()[0].status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn worker_pool_drains_submitted_tasks() {
        let repo = InMemoryRepository::new();
        let ctx = context(|| Ok(serde_json::json!({ "ok": true })), Duration::ZERO);
        let queue = TaskQueue::new(
            Arc::new(repo.clone()),
            WorkerConfig {
                poll_interval_ms: 10,
                ..WorkerConfig::default()
            },
            Arc::downgrade(&ctx),
            None,
            None,
        );

        for _ in 0..3 {
            queue
                .submit_task(
                    Uuid::new_v4(),
                    &ProcessPdfInfoPayload {
                        score_id: Uuid::new_v4(),
                    },
                )
                .await
                .unwrap();
        }

        for _ in 0..200 {
            if repo
                .tasks()
                .iter()
                .all(|t| t.status == TaskStatus::Completed)
            {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        queue.shutdown().await;
        assert!(repo
            .tasks()
            .iter()
            .all(|t| t.status == TaskStatus::Completed));
    }
}
