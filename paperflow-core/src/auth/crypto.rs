use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{CoreError, Result};

/// Password hashing for staff accounts.
///
/// Argon2id with the crate defaults (64 MiB, 3 iterations) and a random
/// per-hash salt; the PHC string carries its own parameters so future
/// tuning verifies old hashes transparently.
#[derive(Debug, Default, Clone)]
pub struct AuthCrypto {
    argon2: Argon2<'static>,
}

impl AuthCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify against a stored PHC string. Malformed hashes verify as
    /// false rather than erroring, so a corrupted row cannot be used to
    /// probe the hasher.
    pub fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(password_hash) else {
            return false;
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies() {
        let crypto = AuthCrypto::new();
        let hash = crypto.hash_password("correct horse").unwrap();
        assert_ne!(hash, "correct horse");
        assert!(crypto.verify_password("correct horse", &hash));
        assert!(!crypto.verify_password("battery staple", &hash));
    }

    #[test]
    fn salts_are_random_per_hash() {
        let crypto = AuthCrypto::new();
        let h1 = crypto.hash_password("same password").unwrap();
        let h2 = crypto.hash_password("same password").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn malformed_hash_verifies_false() {
        let crypto = AuthCrypto::new();
        assert!(!crypto.verify_password("anything", "not a valid hash"));
    }
}
