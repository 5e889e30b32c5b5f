// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The admin auth facade.
//!
//! [`AdminAuth`] is the only surface the back office talks to. It exposes
//! `login`, `is_authenticated`/`check`, `logout` and a read-only `status`,
//! and owns the login guard and session manager behind them.
//!
//! All mutating operations run under one in-process lock so a recurring check
//! and a foreground call never interleave their read-decide-write sequences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::audit::AuditLogger;
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::errors::{AuthError, StoreError};
use crate::security::locks::resilient_lock;
use crate::security::login_guard::LoginGuard;
use crate::security::session_manager::{Session, SessionManager, SessionStatus};
use crate::store::{FileStore, KeyValueStore};

/// Why a login was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginFailure {
    Invalid,
    Locked,
    Unavailable,
}

/// Result of [`AdminAuth::login`], shaped for the view layer.
///
/// Serializes as `{"ok":true}` or
/// `{"ok":false,"kind":"locked","retryAfterSeconds":12}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LoginFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl LoginOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            kind: None,
            retry_after_seconds: None,
        }
    }

    pub fn from_error(err: &AuthError) -> Self {
        let kind = match err {
            AuthError::InvalidCredentials => LoginFailure::Invalid,
            AuthError::Locked { .. } => LoginFailure::Locked,
            _ => LoginFailure::Unavailable,
        };
        Self {
            ok: false,
            kind: Some(kind),
            retry_after_seconds: err.retry_after_secs(),
        }
    }

    /// Operator-facing message for a refused login.
    pub fn message(&self) -> Option<String> {
        match self.kind? {
            LoginFailure::Invalid => Some(AuthError::InvalidCredentials.user_message()),
            LoginFailure::Locked => Some(
                AuthError::Locked {
                    retry_after_secs: self.retry_after_seconds.unwrap_or(0),
                }
                .user_message(),
            ),
            LoginFailure::Unavailable => {
                Some("Authentication is temporarily unavailable".to_string())
            }
        }
    }
}

/// Why a check ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    Expired,
    /// Absent or malformed session record
    Invalid,
    StorageUnavailable,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogoutReason::Expired => write!(f, "Session expired"),
            LogoutReason::Invalid => write!(f, "Invalid session"),
            LogoutReason::StorageUnavailable => write!(f, "Session state unavailable"),
        }
    }
}

/// Outcome of one validate-then-renew-or-destroy pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// Session valid. `renewed` holds the new expiry when it was extended.
    Active { renewed: Option<DateTime<Utc>> },
    /// Session ended; the caller should return to the login prompt.
    LoggedOut { reason: LogoutReason },
}

impl SessionCheck {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionCheck::Active { .. })
    }
}

/// Read-only snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub session: SessionStatus,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub session_remaining_secs: Option<i64>,
    pub failure_count: u32,
    pub locked_for_secs: Option<u64>,
}

pub struct AdminAuth {
    guard: LoginGuard,
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    op_lock: Mutex<()>,
}

impl AdminAuth {
    pub fn new(config: &AuthConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, store, clock, None)
    }

    /// Like [`AdminAuth::new`], also appending every auth event to `audit`.
    pub fn with_audit(
        config: &AuthConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self::build(config, store, clock, Some(audit))
    }

    /// Production wiring: file store and audit log under the state directory,
    /// system clock.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        let state_dir = config.state_dir()?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&state_dir));
        let audit = Arc::new(AuditLogger::new(&state_dir, config.audit_log_enabled)?);
        Ok(Self::with_audit(config, store, Arc::new(SystemClock), audit))
    }

    fn build(
        config: &AuthConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        let mut sessions = SessionManager::new(config.session_policy(), store.clone(), clock.clone());
        if let Some(audit) = &audit {
            sessions = sessions.with_audit(audit.clone());
        }
        let sessions = Arc::new(sessions);

        let mut guard = LoginGuard::new(
            config.credential(),
            config.lockout_policy(),
            sessions.clone(),
            store,
            clock.clone(),
        );
        if let Some(audit) = audit {
            guard = guard.with_audit(audit);
        }

        Self {
            guard,
            sessions,
            clock,
            op_lock: Mutex::new(()),
        }
    }

    /// Submit credentials.
    pub fn login(&self, identifier: &str, secret: &str) -> LoginOutcome {
        match self.try_login(identifier, secret) {
            Ok(_) => LoginOutcome::success(),
            Err(e) => {
                if let AuthError::StorageUnavailable(ref cause) = e {
                    tracing::warn!(
                        target: "auth",
                        event = "LOGIN_STORE_UNAVAILABLE",
                        error = %cause,
                        "Login attempt could not be recorded; refusing"
                    );
                }
                LoginOutcome::from_error(&e)
            }
        }
    }

    /// Submit credentials, returning the issued session.
    pub fn try_login(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let _op = resilient_lock(&self.op_lock);
        self.guard.attempt_login(identifier, secret)
    }

    /// Validate, then renew or destroy. Fails closed.
    pub fn check(&self) -> SessionCheck {
        let _op = resilient_lock(&self.op_lock);

        let status = match self.sessions.inspect() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    target: "auth",
                    event = "SESSION_STORE_UNAVAILABLE",
                    error = %e,
                    "Could not read session state; logging out"
                );
                self.force_logout();
                return SessionCheck::LoggedOut {
                    reason: LogoutReason::StorageUnavailable,
                };
            }
        };

        match status {
            SessionStatus::Valid => match self.sessions.maybe_renew() {
                Ok(renewed) => SessionCheck::Active { renewed },
                Err(e) => {
                    let reason = match e {
                        AuthError::SessionExpired => LogoutReason::Expired,
                        AuthError::SessionMissing => LogoutReason::Invalid,
                        _ => {
                            tracing::warn!(
                                target: "auth",
                                event = "SESSION_RENEW_FAILED",
                                error = %e,
                                "Could not renew session; logging out"
                            );
                            LogoutReason::StorageUnavailable
                        }
                    };
                    self.force_logout();
                    SessionCheck::LoggedOut { reason }
                }
            },
            SessionStatus::Expired => {
                self.sessions.note_expired();
                self.force_logout();
                SessionCheck::LoggedOut {
                    reason: LogoutReason::Expired,
                }
            }
            SessionStatus::Missing => {
                self.force_logout();
                SessionCheck::LoggedOut {
                    reason: LogoutReason::Invalid,
                }
            }
        }
    }

    /// `true` only for a valid session (renewed if it was close to expiry).
    pub fn is_authenticated(&self) -> bool {
        self.check().is_active()
    }

    /// Sign out. Failure history is kept.
    pub fn logout(&self) -> Result<(), AuthError> {
        let _op = resilient_lock(&self.op_lock);
        self.sessions.destroy()
    }

    /// Snapshot of session and lockout state. Never mutates.
    ///
    /// Taken under the same lock as login and check, so it never mixes the
    /// halves of a concurrent update.
    pub fn status(&self) -> Result<AuthStatus, StoreError> {
        let _op = resilient_lock(&self.op_lock);
        let now = self.clock.now();
        let session = self.sessions.current()?;
        let attempts = self.guard.attempt_state()?;

        Ok(AuthStatus {
            session: session
                .as_ref()
                .map(|s| s.status_at(now))
                .unwrap_or(SessionStatus::Missing),
            session_expires_at: session.as_ref().map(|s| s.expires_at),
            session_remaining_secs: session.as_ref().map(|s| s.remaining_at(now).num_seconds()),
            failure_count: attempts.failure_count,
            locked_for_secs: attempts.retry_after_secs(now),
        })
    }

    /// Clear the session after a check ended it. Caller holds `op_lock`.
    fn force_logout(&self) {
        if let Err(e) = self.sessions.destroy() {
            tracing::warn!(
                target: "auth",
                event = "SESSION_DESTROY_FAILED",
                error = %e,
                "Could not clear session state"
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
