use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CoreError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// AEAD vault for student LMS tokens.
///
/// AES-256-GCM with a process-wide key loaded once at startup. Ciphertexts
/// are `base64(nonce || ciphertext)`; the nonce is random per encryption.
/// Key rotation would prefix a key id to the ciphertext; the current
/// format supports a single active key.
#[derive(Clone)]
pub struct TokenVault {
    cipher: Aes256Gcm,
}

impl TokenVault {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new_from_slice(key).expect("32-byte key is always valid"),
        }
    }

    /// Parse the configured secret: 64 hex characters or base64 of
    /// exactly 32 bytes.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let bytes = if secret.len() == KEY_LEN * 2 {
            hex::decode(secret)
                .map_err(|_| CoreError::Validation("encryption key is not valid hex".to_string()))?
        } else {
            BASE64.decode(secret).map_err(|_| {
                CoreError::Validation("encryption key is neither hex nor base64".to_string())
            })?
        };

        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::Validation("encryption key must be exactly 32 bytes".to_string())
        })?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::Internal("token encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|_| CoreError::AuthInvalid("malformed session ciphertext".to_string()))?;
        if combined.len() <= NONCE_LEN {
            return Err(CoreError::AuthInvalid(
                "session ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CoreError::AuthInvalid("session token failed to decrypt".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CoreError::Internal("decrypted token is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> TokenVault {
        TokenVault::new(&[7u8; 32])
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let v = vault();
        let token = "c53569d516cd601cb78849cd64f59eaa";
        let ciphertext = v.encrypt(token).unwrap();
        assert_ne!(ciphertext, token);
        assert_eq!(v.decrypt(&ciphertext).unwrap(), token);
    }

    #[test]
    fn nonces_differ_per_encryption() {
        let v = vault();
        assert_ne!(v.encrypt("secret").unwrap(), v.encrypt("secret").unwrap());
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let ciphertext = vault().encrypt("secret_token").unwrap();
        let other = TokenVault::new(&[9u8; 32]);
        assert!(other.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn rejects_garbage_ciphertext() {
        let v = vault();
        assert!(v.decrypt("not base64 at all!!").is_err());
        assert!(v.decrypt(&BASE64.encode(b"short")).is_err());
    }

    #[test]
    fn parses_hex_and_base64_secrets() {
        let hex_secret = hex::encode([3u8; 32]);
        let b64_secret = BASE64.encode([3u8; 32]);

        let a = TokenVault::from_secret(&hex_secret).unwrap();
        let b = TokenVault::from_secret(&b64_secret).unwrap();
        let ciphertext = a.encrypt("shared").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), "shared");

        assert!(TokenVault::from_secret("tooshort").is_err());
    }
}
