// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the authentication core.
//!
//! Every core operation returns one of these as a discriminated result; the
//! view layer decides how to present it. Messages shown to the operator are
//! produced by [`AuthError::user_message`] and never include token values,
//! digests, or file paths.

use std::time::Duration;
use thiserror::Error;

/// Failure of the persisted key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("timed out after {0:?} waiting for the state file lock")]
    LockTimeout(Duration),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a rejected auth operation.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Identifier or secret did not match. Counts toward lockout.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A lockout window is active. Does not count as a new attempt.
    #[error("too many failed attempts, retry in {retry_after_secs}s")]
    Locked { retry_after_secs: u64 },

    #[error("session expired")]
    SessionExpired,

    #[error("no active session")]
    SessionMissing,

    /// A lockout or session deadline does not fit in a timestamp.
    #[error("deadline {secs}s from now is out of range")]
    DeadlineOutOfRange { secs: u64 },

    /// The persisted auth record could not be read or written.
    /// Always fails closed.
    #[error("auth state storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

impl AuthError {
    /// Short operator-facing message.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Invalid username or password".to_string(),
            AuthError::Locked { retry_after_secs } => {
                format!("Access blocked. Try again in {} seconds", retry_after_secs)
            }
            AuthError::SessionExpired | AuthError::SessionMissing => {
                "Please sign in again".to_string()
            }
            AuthError::DeadlineOutOfRange { .. } | AuthError::StorageUnavailable(_) => {
                "Authentication is temporarily unavailable".to_string()
            }
        }
    }

    /// Seconds until another attempt is allowed, for lockouts.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AuthError::Locked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// True when the operator should be sent back to the login prompt.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            AuthError::SessionExpired
                | AuthError::SessionMissing
                | AuthError::DeadlineOutOfRange { .. }
                | AuthError::StorageUnavailable(_)
        )
    }
}

/// Rejected configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid config field `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
