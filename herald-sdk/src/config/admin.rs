//! Admin configuration.

use argon2::{Argon2, PasswordHash, PasswordVerifier};

/// Admin API credentials.
///
/// Only the argon2 hash is kept in memory; the plaintext secret never leaves
/// the configuration loader.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// The argon2 hashed admin secret.
    pub secret_hash: String,
}

impl AdminConfig {
    /// Create a new AdminConfig with the given hashed secret.
    pub fn new(secret_hash: String) -> Self {
        Self { secret_hash }
    }

    /// Verify a plaintext password against the stored hash.
    ///
    /// Returns `true` if the password matches, `false` otherwise.
    pub fn verify_secret(&self, plaintext: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(&self.secret_hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed_hash)
            .is_ok()
    }
}
