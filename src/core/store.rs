//! Store and session handles.
//!
//! A `Store` is the on-disk root holding `grid.db`, the audit log and the optional
//! `config.toml`. A `Session` is the explicit auth context passed to every mutating
//! operation: created at sign-in, invalidated at sign-out, read-only in between.

use crate::core::error::GridError;
use std::path::{Path, PathBuf};

/// Store handle representing one gridbase data directory.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    SignedOut,
}

/// Authenticated user context.
///
/// Identity comes from an external auth provider; gridbase only trusts the
/// `user_id` it is handed and refuses to act once the session is signed out.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    state: SessionState,
}

impl Session {
    pub fn sign_in(user_id: &str, email: Option<&str>) -> Result<Self, GridError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(GridError::Unauthenticated("empty user id".to_string()));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            email: email.map(|e| e.to_string()),
            state: SessionState::Active,
        })
    }

    pub fn sign_out(&mut self) {
        self.state = SessionState::SignedOut;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Returns the user id, or `Unauthenticated` once signed out.
    pub fn require_active(&self) -> Result<&str, GridError> {
        match self.state {
            SessionState::Active => Ok(&self.user_id),
            SessionState::SignedOut => Err(GridError::Unauthenticated(format!(
                "user '{}' has signed out",
                self.user_id
            ))),
        }
    }
}
