use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use scoremate_core::models::{NewTask, Task};

/// Channel workers LISTEN on for new-task wakeups.
pub const TASK_NOTIFY_CHANNEL: &str = "scoremate_new_task";

const TASK_COLUMNS: &str = r#"
    id,
    user_id,
    task_type,
    status,
    priority,
    payload,
    result,
    last_error,
    scheduled_at,
    started_at,
    completed_at,
    retry_count,
    max_retries,
    timeout_seconds,
    created_at,
    updated_at
"#;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    async fn get_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>>;

    /// Claim the highest-priority due task and mark it running.
    async fn claim_next_task(&self) -> Result<Option<Task>>;

    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task>;

    async fn mark_failed(&self, task_id: Uuid, error: &str) -> Result<Task>;

    /// Put the task back to pending, due after `delay_secs`, and count the attempt.
    async fn schedule_retry(&self, task_id: Uuid, delay_secs: u64, error: &str) -> Result<Task>;

    /// Return running tasks whose deadline plus `grace_period_secs` has passed
    /// to pending (or failed when out of retries). Returns the number touched.
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[tracing::instrument(skip(self, task), fields(task_type = %task.task_type, user_id = %task.user_id))]
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let scheduled_at = task.scheduled_at.unwrap_or_else(Utc::now);

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let sql = format!(
            r#"
            INSERT INTO tasks (
                user_id, task_type, status, priority, payload, scheduled_at,
                max_retries, timeout_seconds
            )
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let created: Task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task.user_id)
            .bind(task.task_type.to_string())
            .bind(task.priority.as_i32())
            .bind(&task.payload)
            .bind(scheduled_at)
            .bind(task.max_retries)
            .bind(task.timeout_seconds)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    user_id = %task.user_id,
                    task_type = %task.task_type,
                    "Failed to insert task into database"
                );
                anyhow::anyhow!("Failed to insert task into database: {}", e)
            })?;

        // Workers fall back to polling when the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(TASK_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task_id = %created.id,
                "Failed to send pg_notify for new task, workers will discover task via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit transaction for task creation")?;

        tracing::info!(
            task_id = %created.id,
            user_id = %created.user_id,
            task_type = %created.task_type,
            priority = created.priority,
            "Task created"
        );

        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE user_id = $1 AND id = $2",
            TASK_COLUMNS
        );
        sqlx::query_as::<Postgres, Task>(&sql)
            .bind(user_id)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")
    }

    /// Shared across users: handlers re-check ownership through the payload.
    #[tracing::instrument(skip(self))]
    async fn claim_next_task(&self) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM tasks
                WHERE status = 'pending'
                    AND scheduled_at <= NOW()
                ORDER BY priority DESC, scheduled_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim next task")?;

        if let Some(ref task) = task {
            tracing::debug!(
                task_id = %task.id,
                user_id = %task.user_id,
                task_type = %task.task_type,
                "Task claimed"
            );
        }

        Ok(task)
    }

    #[tracing::instrument(skip(self, result))]
    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let task: Task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(result)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as completed")?;

        tracing::info!(
            task_id = %task_id,
            task_type = %task.task_type,
            "Task completed"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(&self, task_id: Uuid, error: &str) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                last_error = $2,
                result = jsonb_build_object('error', $2::text),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let task: Task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(error)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as failed")?;

        tracing::error!(
            task_id = %task_id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "Task failed"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn schedule_retry(&self, task_id: Uuid, delay_secs: u64, error: &str) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'pending',
                retry_count = retry_count + 1,
                last_error = $3,
                started_at = NULL,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let task: Task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(task_id)
            .bind(delay_secs as i64)
            .bind(error)
            .fetch_one(&self.pool)
            .await
            .context("Failed to schedule task retry")?;

        tracing::info!(
            task_id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            delay_secs,
            "Task retry scheduled"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = CASE WHEN retry_count + 1 > max_retries THEN 'failed' ELSE 'pending' END,
                retry_count = retry_count + 1,
                last_error = 'Task exceeded its timeout while running',
                started_at = NULL,
                completed_at = CASE WHEN retry_count + 1 > max_retries THEN NOW() ELSE NULL END,
                scheduled_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at IS NOT NULL
                AND started_at
                    + (COALESCE(timeout_seconds, 0) * interval '1 second')
                    + ($1 * interval '1 second') < NOW()
            "#,
        )
        .bind(grace_period_secs)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, grace_period_secs, "Reaped stale running tasks");
        }
        Ok(count)
    }
}
