//! Authentication primitives for the two principals: staff (local
//! password + signed bearer token) and students (LMS token exchange with
//! the ciphertext persisted in a session row).

mod crypto;
mod token;
mod vault;

pub use crypto::AuthCrypto;
pub use token::{StaffClaims, StaffTokenKeys};
pub use vault::TokenVault;

use rand::rngs::OsRng;
use rand::RngCore;

/// 128-bit random student session identifier, hex encoded.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_hex() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
