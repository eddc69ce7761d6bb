use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Append-only audit record. One row per mutating API call, named after
/// the endpoint (plus repository-level `UPLOAD`/`UPLOAD_DUP` entries and
/// orchestrator `SUBMIT_*` outcomes).
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub actor_username: Option<String>,
    pub target: Option<String>,
    pub request_payload: Option<serde_json::Value>,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: String,
    pub actor_type: String,
    pub actor_id: Option<String>,
    pub actor_username: Option<String>,
    pub target: Option<String>,
    pub request_payload: Option<serde_json::Value>,
    pub result: String,
}

impl NewAuditEntry {
    pub fn new(action: impl Into<String>, actor_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            actor_type: actor_type.into(),
            actor_id: None,
            actor_username: None,
            target: None,
            request_payload: None,
            result: "ok".to_string(),
        }
    }

    pub fn actor(mut self, id: impl ToString, username: impl Into<String>) -> Self {
        self.actor_id = Some(id.to_string());
        self.actor_username = Some(username.into());
        self
    }

    pub fn target(mut self, target: impl ToString) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.request_payload = Some(payload);
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }
}
