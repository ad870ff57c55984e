//! Shared-password gate in front of channel authentication.

use crate::error::{AppError, AppResult};
use tracing::debug;

/// Checks a candidate password against the single server-held secret.
#[derive(Clone)]
pub struct CredentialGate {
    password: String,
}

impl CredentialGate {
    pub fn new(password: String) -> Self {
        Self { password }
    }

    /// Exact string comparison. A mismatch is `InvalidCredentials` (401).
    pub fn validate(&self, candidate: &str) -> AppResult<()> {
        if candidate != self.password {
            debug!("shared password mismatch");
            return Err(AppError::InvalidCredentials);
        }
        Ok(())
    }
}
