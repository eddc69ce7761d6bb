use chrono::{DateTime, Utc};
use serde::Serialize;

/// A student session backed by an encrypted Moodle web-service token.
///
/// Only the AEAD ciphertext of the LMS token is ever persisted; decryption
/// happens inside the submission request scope and the plaintext never
/// leaves it.
#[derive(Debug, Clone, Serialize)]
pub struct StudentSession {
    pub id: String,
    pub moodle_username: String,
    pub moodle_user_id: i64,
    #[serde(skip_serializing)]
    pub encrypted_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StudentSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
