//! Process-local implementation of every repository trait.
//!
//! All state sits behind one mutex, so each operation is atomic in the same
//! sense the Postgres transactions are. Used for `DATABASE_BACKEND=memory`
//! and in tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use scoremate_core::models::{
    NewTask, Reservation, Score, ScoreInfoUpdate, ScoreMetadata, ScoreUsage, Task, TaskStatus,
    UserQuota,
};

use super::quota::QuotaLedger;
use super::reservation::ReservationStore;
use super::score::ScoreStore;
use super::task::TaskStore;
use super::upload::{CommittedUpload, ReleasedScore, UploadCommitter};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserQuota>,
    reservations: HashMap<Uuid, Reservation>,
    scores: HashMap<Uuid, Score>,
    tasks: HashMap<Uuid, Task>,
}

impl State {
    fn take_reservation(&mut self, id: Uuid, user_id: Uuid) -> Option<Reservation> {
        let live = self
            .reservations
            .get(&id)
            .is_some_and(|r| r.user_id == user_id && r.is_live());
        if live {
            self.reservations.remove(&id)
        } else {
            None
        }
    }

    fn user_mut(&mut self, user_id: Uuid) -> Result<&mut UserQuota> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("User {} not found", user_id))
    }

    fn task_mut(&mut self, task_id: Uuid) -> Result<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("Task {} not found", task_id))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Account provisioning: create or overwrite a user's counters.
    pub fn provision_user(&self, user_id: Uuid, total_mb: i64, used_mb: i64) -> UserQuota {
        let quota = UserQuota {
            user_id,
            total_mb,
            used_mb: used_mb.max(0),
        };
        self.lock().users.insert(user_id, quota);
        quota
    }

    /// Every task ever created, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn reservation_count(&self) -> usize {
        self.lock().reservations.len()
    }
}

#[async_trait]
impl QuotaLedger for InMemoryRepository {
    async fn ensure_user(&self, user_id: Uuid, default_total_mb: i64) -> Result<UserQuota> {
        let mut state = self.lock();
        Ok(*state.users.entry(user_id).or_insert(UserQuota {
            user_id,
            total_mb: default_total_mb,
            used_mb: 0,
        }))
    }

    async fn get_quota(&self, user_id: Uuid) -> Result<Option<UserQuota>> {
        Ok(self.lock().users.get(&user_id).copied())
    }

    async fn increment_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota> {
        let mut state = self.lock();
        let quota = state.user_mut(user_id)?;
        quota.used_mb += delta_mb.max(0);
        Ok(*quota)
    }

    async fn decrement_used(&self, user_id: Uuid, delta_mb: i64) -> Result<UserQuota> {
        let mut state = self.lock();
        let quota = state.user_mut(user_id)?;
        quota.used_mb = (quota.used_mb - delta_mb.max(0)).max(0);
        Ok(*quota)
    }
}

#[async_trait]
impl ReservationStore for InMemoryRepository {
    async fn insert(&self, reservation: &Reservation) -> Result<Reservation> {
        let mut state = self.lock();
        if state.reservations.contains_key(&reservation.id) {
            return Err(anyhow!(
                "Reservation {} already exists",
                Reservation::store_key(reservation.id)
            ));
        }
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation.clone())
    }

    async fn delete(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut state = self.lock();
        let owned = state
            .reservations
            .get(&id)
            .is_some_and(|r| r.user_id == user_id);
        Ok(owned && state.reservations.remove(&id).is_some())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut state = self.lock();
        let before = state.reservations.len();
        state.reservations.retain(|_, r| !r.is_expired_at(now));
        Ok((before - state.reservations.len()) as u64)
    }
}

#[async_trait]
impl ScoreStore for InMemoryRepository {
    async fn get(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<Score>> {
        Ok(self
            .lock()
            .scores
            .get(&score_id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn get_by_id(&self, score_id: Uuid) -> Result<Option<Score>> {
        Ok(self.lock().scores.get(&score_id).cloned())
    }

    async fn list(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Score>> {
        let mut scores: Vec<Score> = self
            .lock()
            .scores
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        scores.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(scores
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn usage(&self, user_id: Uuid) -> Result<Vec<ScoreUsage>> {
        Ok(self
            .lock()
            .scores
            .values()
            .filter(|s| s.user_id == user_id)
            .map(Score::usage)
            .collect())
    }

    async fn update_info(&self, score_id: Uuid, update: &ScoreInfoUpdate) -> Result<Option<Score>> {
        let mut state = self.lock();
        Ok(state.scores.get_mut(&score_id).map(|score| {
            score.apply_info(update);
            score.clone()
        }))
    }

    async fn set_thumbnail_key(&self, score_id: Uuid, thumbnail_key: &str) -> Result<bool> {
        let mut state = self.lock();
        Ok(match state.scores.get_mut(&score_id) {
            Some(score) => {
                score.thumbnail_key = Some(thumbnail_key.to_string());
                score.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl UploadCommitter for InMemoryRepository {
    async fn commit_upload(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
        metadata: &ScoreMetadata,
    ) -> Result<Option<CommittedUpload>> {
        let mut state = self.lock();
        if !state.users.contains_key(&user_id) {
            return Err(anyhow!("User {} not found", user_id));
        }
        let Some(reservation) = state.take_reservation(upload_id, user_id) else {
            return Ok(None);
        };

        let charged_mb = reservation.charged_mb();
        let quota = {
            let quota = state.user_mut(user_id)?;
            quota.used_mb += charged_mb;
            *quota
        };

        let now = Utc::now();
        let score = Score {
            id: Uuid::new_v4(),
            user_id,
            title: metadata.title.clone(),
            composer: metadata.composer.clone(),
            instrumentation: metadata.instrumentation.clone(),
            tags: metadata.tags.clone(),
            s3_key: reservation.s3_key,
            size_bytes: reservation.size_bytes,
            mime_type: reservation.mime_type,
            pages: None,
            thumbnail_key: None,
            content_hash: None,
            created_at: now,
            updated_at: now,
        };
        state.scores.insert(score.id, score.clone());

        Ok(Some(CommittedUpload {
            score,
            quota,
            charged_mb,
        }))
    }

    async fn release_score(&self, user_id: Uuid, score_id: Uuid) -> Result<Option<ReleasedScore>> {
        let mut state = self.lock();
        let owned = state
            .scores
            .get(&score_id)
            .is_some_and(|s| s.user_id == user_id);
        if !owned {
            return Ok(None);
        }
        // Check the user first so a failure leaves the score in place.
        state.user_mut(user_id)?;
        let Some(score) = state.scores.remove(&score_id) else {
            return Ok(None);
        };

        let released_mb = score.charged_mb();
        let quota = state.user_mut(user_id)?;
        quota.used_mb = (quota.used_mb - released_mb).max(0);
        let quota = *quota;

        Ok(Some(ReleasedScore {
            score,
            quota,
            released_mb,
        }))
    }
}

#[async_trait]
impl TaskStore for InMemoryRepository {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let created = Task {
            id: Uuid::new_v4(),
            user_id: task.user_id,
            task_type: task.task_type,
            status: TaskStatus::Pending,
            priority: task.priority.as_i32(),
            payload: task.payload,
            result: None,
            last_error: None,
            scheduled_at: task.scheduled_at.unwrap_or(now),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: task.max_retries,
            timeout_seconds: task.timeout_seconds,
            created_at: now,
            updated_at: now,
        };
        self.lock().tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .lock()
            .tasks
            .get(&task_id)
            .filter(|t| t.user_id == user_id)
            .cloned())
    }

    async fn claim_next_task(&self) -> Result<Option<Task>> {
        let mut state = self.lock();
        let next = state
            .tasks
            .values()
            .filter(|t| t.is_ready_to_run())
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.scheduled_at.cmp(&a.scheduled_at))
            })
            .map(|t| t.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let task = state.task_mut(id)?;
        let now = Utc::now();
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn mark_completed(&self, task_id: Uuid, result: serde_json::Value) -> Result<Task> {
        let mut state = self.lock();
        let task = state.task_mut(task_id)?;
        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn mark_failed(&self, task_id: Uuid, error: &str) -> Result<Task> {
        let mut state = self.lock();
        let task = state.task_mut(task_id)?;
        let now = Utc::now();
        task.status = TaskStatus::Failed;
        task.last_error = Some(error.to_string());
        task.result = Some(serde_json::json!({ "error": error }));
        task.completed_at = Some(now);
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn schedule_retry(&self, task_id: Uuid, delay_secs: u64, error: &str) -> Result<Task> {
        let mut state = self.lock();
        let task = state.task_mut(task_id)?;
        let now = Utc::now();
        task.status = TaskStatus::Pending;
        task.retry_count += 1;
        task.last_error = Some(error.to_string());
        task.started_at = None;
        task.scheduled_at = now + ChronoDuration::seconds(delay_secs as i64);
        task.updated_at = now;
        Ok(task.clone())
    }

    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let mut reaped = 0;
        for task in self.lock().tasks.values_mut() {
            let Some(started_at) = task.started_at else {
                continue;
            };
            let deadline = started_at
                + ChronoDuration::seconds(task.timeout_seconds.unwrap_or(0) as i64)
                + ChronoDuration::seconds(grace_period_secs);
            if task.status != TaskStatus::Running || deadline >= now {
                continue;
            }
            task.retry_count += 1;
            task.last_error = Some("Task exceeded its timeout while running".to_string());
            task.started_at = None;
            task.scheduled_at = now;
            task.updated_at = now;
            if task.retry_count > task.max_retries {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
            } else {
                task.status = TaskStatus::Pending;
            }
            reaped += 1;
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoremate_core::models::{ProcessPdfInfoPayload, BYTES_PER_MB};

    fn reservation(user_id: Uuid, size_mb: i64, ttl_secs: i64) -> Reservation {
        Reservation::new(
            Uuid::new_v4(),
            user_id,
            size_mb * BYTES_PER_MB,
            format!("{}/uploads/x/original.pdf", user_id),
            "application/pdf".to_string(),
            Some("x.pdf".to_string()),
            ChronoDuration::seconds(ttl_secs),
        )
    }

    fn metadata() -> ScoreMetadata {
        ScoreMetadata {
            title: "Prelude".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn decrement_clamps_at_zero() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        repo.provision_user(user, 200, 10);

        let quota = repo.decrement_used(user, 500).await.unwrap();
        assert_eq!(quota.used_mb, 0);
        assert_eq!(quota.available_mb(), 200);
    }

    #[tokio::test]
    async fn commit_consumes_reservation_exactly_once() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        repo.ensure_user(user, 200).await.unwrap();

        let r = reservation(user, 50, 300);
        repo.insert(&r).await.unwrap();

        let committed = repo
            .commit_upload(user, r.id, &metadata())
            .await
            .unwrap()
            .expect("first confirm wins");
        assert_eq!(committed.charged_mb, 50);
        assert_eq!(committed.quota.used_mb, 50);
        assert_eq!(committed.score.size_bytes, 50 * BYTES_PER_MB);

        assert!(repo
            .commit_upload(user, r.id, &metadata())
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.get_quota(user).await.unwrap().unwrap().used_mb, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_confirms_of_one_reservation_charge_once() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        repo.ensure_user(user, 200).await.unwrap();
        let r = reservation(user, 10, 300);
        repo.insert(&r).await.unwrap();

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                let id = r.id;
                tokio::spawn(async move { repo.commit_upload(user, id, &metadata()).await })
            })
            .collect();
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(repo.get_quota(user).await.unwrap().unwrap().used_mb, 10);
        assert_eq!(repo.reservation_count(), 0);
    }

    #[tokio::test]
    async fn foreign_and_expired_reservations_are_invisible() {
        let repo = InMemoryRepository::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        repo.ensure_user(owner, 200).await.unwrap();
        repo.ensure_user(other, 200).await.unwrap();

        let r = reservation(owner, 1, 300);
        repo.insert(&r).await.unwrap();
        assert!(repo
            .commit_upload(other, r.id, &metadata())
            .await
            .unwrap()
            .is_none());
        assert!(!repo.delete(r.id, other).await.unwrap());
        assert_eq!(repo.reservation_count(), 1);

        let expired = reservation(owner, 1, 0);
        repo.insert(&expired).await.unwrap();
        assert!(repo
            .commit_upload(owner, expired.id, &metadata())
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.purge_expired().await.unwrap(), 1);
        assert_eq!(repo.reservation_count(), 1);
    }

    #[tokio::test]
    async fn release_refunds_charged_megabytes() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        repo.ensure_user(user, 200).await.unwrap();
        let r = reservation(user, 20, 300);
        repo.insert(&r).await.unwrap();
        let committed = repo
            .commit_upload(user, r.id, &metadata())
            .await
            .unwrap()
            .unwrap();

        assert!(repo
            .release_score(Uuid::new_v4(), committed.score.id)
            .await
            .unwrap()
            .is_none());

        let released = repo
            .release_score(user, committed.score.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(released.released_mb, 20);
        assert_eq!(released.quota.used_mb, 0);
        assert!(repo.get(user, committed.score.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_prefers_priority_then_age() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        let payload = ProcessPdfInfoPayload {
            score_id: Uuid::new_v4(),
        };

        let mut low = NewTask::from_payload(user, &payload, 3).unwrap();
        low.priority = scoremate_core::models::Priority::Low;
        let low = repo.create_task(low).await.unwrap();
        let mut high = NewTask::from_payload(user, &payload, 3).unwrap();
        high.priority = scoremate_core::models::Priority::High;
        let high = repo.create_task(high).await.unwrap();

        assert_eq!(repo.claim_next_task().await.unwrap().unwrap().id, high.id);
        assert_eq!(repo.claim_next_task().await.unwrap().unwrap().id, low.id);
        assert!(repo.claim_next_task().await.unwrap().is_none());

        let retried = repo.schedule_retry(low.id, 60, "boom").await.unwrap();
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.status, TaskStatus::Pending);
        // Not due for another minute.
        assert!(repo.claim_next_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reaper_returns_overdue_tasks() {
        let repo = InMemoryRepository::new();
        let user = Uuid::new_v4();
        let payload = ProcessPdfInfoPayload {
            score_id: Uuid::new_v4(),
        };
        let mut new_task = NewTask::from_payload(user, &payload, 3).unwrap();
        new_task.timeout_seconds = Some(0);
        let task = repo.create_task(new_task).await.unwrap();
        repo.claim_next_task().await.unwrap();

        assert_eq!(repo.reap_stale_running_tasks(-1).await.unwrap(), 1);
        let task = repo.get_task(user, task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
    }
}
