use argon2::{
    password_hash::{rand_core, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use std::sync::LazyLock;

use crate::error::BrainwinError;

/// Hash verified when no account matches, so an unknown email costs the
/// same Argon2 work as a known one.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("brainwin-no-such-account").ok());

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, BrainwinError> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| BrainwinError::Storage(format!("password hashing failed: {e}")))
}

/// Returns `false` for a wrong password and for an unparseable hash alike.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a valid PHC string");
            false
        }
    }
}

/// Verify against `stored`, or against a dummy hash when there is no
/// account. Always `false` in the latter case.
pub fn verify_account_password(password: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(phc) => verify_password(password, phc),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                let _ = verify_password(password, dummy);
            }
            false
        }
    }
}
