use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ExamType;

/// Binds `(subject_code, exam_type)` to a Moodle course and assignment.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectMapping {
    pub id: Uuid,
    pub subject_code: String,
    pub exam_type: ExamType,
    pub moodle_course_id: i64,
    pub moodle_assignment_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One-to-one map from a Moodle username to a register number within an
/// exam session. Artifacts whose register has no mapping surface only in
/// the staff "unassigned" view.
#[derive(Debug, Clone, Serialize)]
pub struct UsernameRegisterMap {
    pub id: Uuid,
    pub moodle_username: String,
    pub register_number: String,
    pub created_at: DateTime<Utc>,
}
