use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{StaffRole, StaffUser};

/// Claims carried by a staff bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffClaims {
    pub sub: Uuid,
    pub username: String,
    pub role: StaffRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// HS256 signing/verification keys for staff tokens, derived from the
/// configured secret at startup.
#[derive(Clone)]
pub struct StaffTokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl StaffTokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, staff: &StaffUser, lifetime: Duration) -> Result<(String, i64)> {
        let now = Utc::now();
        let exp = now + lifetime;
        let claims = StaffClaims {
            sub: staff.id,
            username: staff.username.clone(),
            role: staff.role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))?;
        Ok((token, exp.timestamp()))
    }

    /// Rejects on signature mismatch or expiry; the caller still checks
    /// the staff id against the database.
    pub fn verify(&self, token: &str) -> Result<StaffClaims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<StaffClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::AuthInvalid(format!("invalid bearer token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn staff() -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            username: "invigilator".to_string(),
            password_hash: String::new(),
            role: StaffRole::Admin,
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn issue_and_verify_round_trips() {
        let keys = StaffTokenKeys::new("test-secret");
        let user = staff();
        let (token, exp) = keys.issue(&user, Duration::minutes(60)).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "invigilator");
        assert_eq!(claims.role, StaffRole::Admin);
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn rejects_expired_tokens() {
        let keys = StaffTokenKeys::new("test-secret");
        let (token, _) = keys.issue(&staff(), Duration::seconds(-120)).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let keys = StaffTokenKeys::new("secret-one");
        let other = StaffTokenKeys::new("secret-two");
        let (token, _) = keys.issue(&staff(), Duration::minutes(5)).unwrap();
        assert!(other.verify(&token).is_err());
        assert!(keys.verify("not.a.token").is_err());
    }
}
