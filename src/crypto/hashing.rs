//! Password digesting and strength policy.
//!
//! Digests are salted SHA-256 over the UTF-8 concatenation `password || salt`,
//! stored as lowercase hex. Verification compares in constant time.

use super::CryptoError;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?/";

/// SHA-256 of `data`, lowercase hex.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Generate a 16-byte random salt, encoded as 32 hex chars.
pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Derive the stored digest for a password and salt.
pub fn digest_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a submitted password against the stored digest, in constant time.
pub fn verify_password(password: &str, salt: &str, stored: &str) -> bool {
    let computed = digest_password(password, salt);
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Validate password strength per the configured policy.
///
/// With `require_special` set, the password needs at least one uppercase
/// letter, one lowercase letter, one digit, and one character from the fixed
/// special set.
pub fn validate_password_strength(
    password: &str,
    min_length: usize,
    require_special: bool,
) -> Result<(), CryptoError> {
    if password.len() < min_length {
        return Err(CryptoError::WeakPassword(format!(
            "password must be at least {min_length} characters long"
        )));
    }

    if require_special {
        let mut has_upper = false;
        let mut has_lower = false;
        let mut has_digit = false;
        let mut has_special = false;

        for c in password.chars() {
            match c {
                'A'..='Z' => has_upper = true,
                'a'..='z' => has_lower = true,
                '0'..='9' => has_digit = true,
                c if SPECIAL_CHARS.contains(c) => has_special = true,
                _ => {}
            }
        }

        if !has_special {
            return Err(CryptoError::WeakPassword(
                "password must contain at least one special character".into(),
            ));
        }
        if !has_digit {
            return Err(CryptoError::WeakPassword(
                "password must contain at least one digit".into(),
            ));
        }
        if !has_upper {
            return Err(CryptoError::WeakPassword(
                "password must contain at least one uppercase letter".into(),
            ));
        }
        if !has_lower {
            return Err(CryptoError::WeakPassword(
                "password must contain at least one lowercase letter".into(),
            ));
        }
    }

    Ok(())
}
