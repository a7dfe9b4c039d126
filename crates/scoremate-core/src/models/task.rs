use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ProcessPdfInfo,
    GenerateThumbnail,
    GenerateAllPageThumbnails,
    DeleteScoreFiles,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::ProcessPdfInfo => write!(f, "process_pdf_info"),
            TaskType::GenerateThumbnail => write!(f, "generate_thumbnail"),
            TaskType::GenerateAllPageThumbnails => write!(f, "generate_all_page_thumbnails"),
            TaskType::DeleteScoreFiles => write!(f, "delete_score_files"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process_pdf_info" => Ok(TaskType::ProcessPdfInfo),
            "generate_thumbnail" => Ok(TaskType::GenerateThumbnail),
            "generate_all_page_thumbnails" => Ok(TaskType::GenerateAllPageThumbnails),
            "delete_score_files" => Ok(TaskType::DeleteScoreFiles),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            task_type: row.try_get::<String, _>("task_type")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            status: row.try_get::<String, _>("status")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            last_error: row.try_get("last_error")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Task {
    pub fn is_ready_to_run(&self) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_at <= Utc::now()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Type-safe task payloads; each payload knows which handler runs it.
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;

    fn priority(&self) -> Priority {
        Priority::Normal
    }
}

/// A task to be enqueued.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: Uuid,
    pub task_type: TaskType,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
}

impl NewTask {
    pub fn from_payload<P: TaskPayload>(
        user_id: Uuid,
        payload: &P,
        max_retries: i32,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            user_id,
            task_type: P::task_type(),
            priority: payload.priority(),
            payload: serde_json::to_value(payload)?,
            scheduled_at: None,
            max_retries,
            timeout_seconds: None,
        })
    }
}

/// Extract page count and title/composer from the original PDF.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessPdfInfoPayload {
    pub score_id: Uuid,
}

impl TaskPayload for ProcessPdfInfoPayload {
    fn task_type() -> TaskType {
        TaskType::ProcessPdfInfo
    }
}

/// Render one page (1-based) to a JPEG thumbnail. Page 1 is the cover.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateThumbnailPayload {
    pub score_id: Uuid,
    #[serde(default = "first_page")]
    pub page: i32,
}

fn first_page() -> i32 {
    1
}

impl TaskPayload for GenerateThumbnailPayload {
    fn task_type() -> TaskType {
        TaskType::GenerateThumbnail
    }

    fn priority(&self) -> Priority {
        if self.page == 1 {
            Priority::High
        } else {
            Priority::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateAllPageThumbnailsPayload {
    pub score_id: Uuid,
}

impl TaskPayload for GenerateAllPageThumbnailsPayload {
    fn task_type() -> TaskType {
        TaskType::GenerateAllPageThumbnails
    }

    fn priority(&self) -> Priority {
        Priority::Low
    }
}

/// Objects left behind by a deleted score. Carries everything needed because
/// the record itself is already gone when this runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteScoreFilesPayload {
    pub user_id: Uuid,
    pub score_id: Uuid,
    pub original_key: String,
    pub thumbnail_key: Option<String>,
    pub pages: Option<i32>,
}

impl TaskPayload for DeleteScoreFilesPayload {
    fn task_type() -> TaskType {
        TaskType::DeleteScoreFiles
    }

    fn priority(&self) -> Priority {
        Priority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_text() {
        for t in [
            TaskType::ProcessPdfInfo,
            TaskType::GenerateThumbnail,
            TaskType::GenerateAllPageThumbnails,
            TaskType::DeleteScoreFiles,
        ] {
            assert_eq!(t.to_string().parse::<TaskType>().unwrap(), t);
        }
        assert!("video_transcode".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_status_parses() {
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
        assert!("scheduled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn thumbnail_page_defaults_to_cover() {
        let payload: GenerateThumbnailPayload =
            serde_json::from_value(serde_json::json!({ "score_id": Uuid::nil() })).unwrap();
        assert_eq!(payload.page, 1);
        assert_eq!(payload.priority(), Priority::High);
    }

    #[test]
    fn new_task_carries_payload_type() {
        let payload = DeleteScoreFilesPayload {
            user_id: Uuid::new_v4(),
            score_id: Uuid::new_v4(),
            original_key: "a/uploads/b/original.pdf".to_string(),
            thumbnail_key: None,
            pages: Some(3),
        };
        let task = NewTask::from_payload(payload.user_id, &payload, 3).unwrap();
        assert_eq!(task.task_type, TaskType::DeleteScoreFiles);
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.payload["pages"], 3);
    }
}
