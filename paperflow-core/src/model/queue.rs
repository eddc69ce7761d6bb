use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in_flight")]
    InFlight,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::InFlight => "in_flight",
            QueueStatus::Done => "done",
            QueueStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "queued" => Ok(QueueStatus::Queued),
            "in_flight" => Ok(QueueStatus::InFlight),
            "done" => Ok(QueueStatus::Done),
            "abandoned" => Ok(QueueStatus::Abandoned),
            other => Err(CoreError::Internal(format!("unknown queue status: {other}"))),
        }
    }
}

/// A pending retry of a failed LMS submission.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub session_id: String,
    pub status: QueueStatus,
    pub retry_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
