use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Examination round an answer paper belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExamType {
    #[default]
    #[serde(rename = "CIA1")]
    Cia1,
    #[serde(rename = "CIA2")]
    Cia2,
    #[serde(rename = "CIA3")]
    Cia3,
    #[serde(rename = "SEM")]
    Sem,
}

impl ExamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamType::Cia1 => "CIA1",
            ExamType::Cia2 => "CIA2",
            ExamType::Cia3 => "CIA3",
            ExamType::Sem => "SEM",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CIA1" => Ok(ExamType::Cia1),
            "CIA2" => Ok(ExamType::Cia2),
            "CIA3" => Ok(ExamType::Cia3),
            "SEM" => Ok(ExamType::Sem),
            other => Err(CoreError::Validation(format!("unknown exam type: {other}"))),
        }
    }
}

impl std::fmt::Display for ExamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow states of an artifact.
///
/// Legal transitions:
/// `PENDING -> SUBMITTING -> SUBMITTED_TO_LMS | FAILED`,
/// `FAILED -> SUBMITTING` (retry), `PENDING | FAILED -> SUPERSEDED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "SUBMITTING")]
    Submitting,
    #[serde(rename = "SUBMITTED_TO_LMS")]
    SubmittedToLms,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SUPERSEDED")]
    Superseded,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Submitting => "SUBMITTING",
            WorkflowStatus::SubmittedToLms => "SUBMITTED_TO_LMS",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Superseded => "SUPERSEDED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "PENDING" => Ok(WorkflowStatus::Pending),
            "SUBMITTING" => Ok(WorkflowStatus::Submitting),
            "SUBMITTED_TO_LMS" => Ok(WorkflowStatus::SubmittedToLms),
            "FAILED" => Ok(WorkflowStatus::Failed),
            "SUPERSEDED" => Ok(WorkflowStatus::Superseded),
            other => Err(CoreError::Internal(format!(
                "unknown workflow status in database: {other}"
            ))),
        }
    }

    /// Whether a student may (re-)submit an artifact in this state.
    pub fn is_submittable(&self) -> bool {
        matches!(self, WorkflowStatus::Pending | WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scanned answer-paper record.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub id: Uuid,
    pub raw_filename: String,
    pub canonical_filename: String,
    pub parsed_reg_no: Option<String>,
    pub parsed_subject_code: Option<String>,
    pub exam_type: ExamType,
    pub attempt_number: i32,
    pub content_hash: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub disk_path: Option<String>,
    pub moodle_user_id: Option<i64>,
    pub moodle_username: Option<String>,
    pub course_id: Option<i64>,
    pub assignment_id: Option<i64>,
    pub draft_item_id: Option<i64>,
    pub submission_id: Option<String>,
    pub workflow_status: WorkflowStatus,
    pub idempotency_key: Option<String>,
    pub transaction_log: serde_json::Value,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub auto_processed: bool,
    pub tombstoned: bool,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new artifact. The repository computes the attempt
/// number and supersedes prior rows; callers never set those.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub raw_filename: String,
    pub canonical_filename: String,
    pub parsed_reg_no: Option<String>,
    pub parsed_subject_code: Option<String>,
    pub exam_type: ExamType,
    pub content_hash: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub disk_path: Option<String>,
    pub file_content: Vec<u8>,
    pub auto_processed: bool,
    pub uploaded_by: Option<Uuid>,
}

/// Compact listing row for staff/admin views.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub id: Uuid,
    pub filename: String,
    pub register_number: Option<String>,
    pub subject_code: Option<String>,
    pub exam_type: ExamType,
    pub attempt_number: i32,
    pub status: WorkflowStatus,
    pub auto_processed: bool,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_type_parse_is_case_insensitive() {
        assert_eq!(ExamType::parse("cia2").unwrap(), ExamType::Cia2);
        assert_eq!(ExamType::parse(" SEM ").unwrap(), ExamType::Sem);
        assert!(ExamType::parse("CIA4").is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Submitting,
            WorkflowStatus::SubmittedToLms,
            WorkflowStatus::Failed,
            WorkflowStatus::Superseded,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn only_pending_and_failed_are_submittable() {
        assert!(WorkflowStatus::Pending.is_submittable());
        assert!(WorkflowStatus::Failed.is_submittable());
        assert!(!WorkflowStatus::Submitting.is_submittable());
        assert!(!WorkflowStatus::SubmittedToLms.is_submittable());
        assert!(!WorkflowStatus::Superseded.is_submittable());
    }
}
