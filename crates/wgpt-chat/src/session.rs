//! Locally stored user identity.
//!
//! The record is written by the sign-in flow and trusted as-is. The chat
//! client reads it for display, and clears it on logout.

use std::sync::Arc;

use tracing::{info, warn};

use wgpt_core::error::WgptError;
use wgpt_core::types::UserRecord;
use wgpt_storage::{keys, LocalStore};

/// Where the caller should navigate next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// No signed-in user; show the login surface.
    Login,
    /// Signed out; show the landing surface.
    Landing,
}

#[derive(Clone)]
pub struct Session {
    backend: Arc<dyn LocalStore>,
}

impl Session {
    pub fn new(backend: Arc<dyn LocalStore>) -> Self {
        Self { backend }
    }

    /// The stored user, if present and readable.
    pub fn current_user(&self) -> Option<UserRecord> {
        let raw = match self.backend.get(keys::USER) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read user record");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Stored user record is malformed");
                None
            }
        }
    }

    pub fn sign_in(&self, user: &UserRecord) -> Result<(), WgptError> {
        let raw = serde_json::to_string(user)?;
        self.backend.set(keys::USER, &raw)?;
        info!(email = %user.email, "User signed in");
        Ok(())
    }

    /// Gate for the chat surface.
    pub fn require_user(&self) -> Result<UserRecord, Redirect> {
        self.current_user().ok_or(Redirect::Login)
    }

    pub fn clear_user(&self) {
        if let Err(e) = self.backend.remove(keys::USER) {
            warn!(error = %e, "Failed to remove user record");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}
