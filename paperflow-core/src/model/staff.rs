use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StaffRole {
    #[serde(rename = "staff")]
    Staff,
    #[serde(rename = "admin")]
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Staff => "staff",
            StaffRole::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "staff" => Ok(StaffRole::Staff),
            "admin" => Ok(StaffRole::Admin),
            other => Err(CoreError::Internal(format!("unknown staff role: {other}"))),
        }
    }
}

/// A staff account authenticated with a local password and bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct StaffUser {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: StaffRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_outranks_staff() {
        assert!(StaffRole::Admin > StaffRole::Staff);
    }
}
