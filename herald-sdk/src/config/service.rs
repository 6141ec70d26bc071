//! Service API configuration.

/// Shared secret used to verify signed publish requests.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    secret: Box<[u8]>,
}

impl ServiceConfig {
    pub fn new(secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Get the secret key bytes for HMAC verification.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}
