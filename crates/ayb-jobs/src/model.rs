use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Mirrors `hook_common::pgqueue::JobStatus`'s shape, but adds `queued` as
/// the initial state (the teacher's queue used a separate `available`
/// instead — renamed here to match the vocabulary spec.md uses throughout).
/// Stored as plain `TEXT` rather than a native Postgres enum type, so this
/// converts at the edges instead of deriving `sqlx::Type` against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" => Ok(JobState::Canceled),
            other => Err(format!("{other} is not a valid job state")),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub run_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub schedule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn state_enum(&self) -> Option<JobState> {
        self.state.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub delay_seconds: Option<i64>,
    pub max_attempts: Option<i32>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_attempts: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleInput {
    pub name: String,
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub cron_expr: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> i32 {
    5
}
