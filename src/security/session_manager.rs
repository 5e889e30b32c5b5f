// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Admin session lifecycle.
//!
//! A session is an opaque token plus an absolute expiry, both kept in the
//! persisted auth record. It is:
//!
//! - **created** by the login guard after a successful credential check,
//! - **validated** on every protected access and on the recurring check,
//! - **renewed** (expiry pushed out, token unchanged) only when the remaining
//!   lifetime drops below the renewal threshold,
//! - **destroyed** on logout or once it is found expired or unreadable.
//!
//! ```text
//! NoSession --create--> Active --maybe_renew--> Active
//! Active --time passes--> Expired --validate + destroy--> NoSession
//! ```
//!
//! Validation fails closed: if the record cannot be read the session is
//! reported as [`SessionStatus::Missing`], never as valid.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::token::generate_session_token;
use crate::audit::AuditLogger;
use crate::clock::{deadline_after, Clock};
use crate::errors::{AuthError, StoreError};
use crate::store::{decode_timestamp, encode_timestamp, keys, KeyValueStore};
use crate::utils::mask_sensitive;

/// Default absolute session lifetime: 2 hours.
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 2 * 60 * 60;

/// Default renewal threshold: 30 minutes before expiry.
pub const DEFAULT_RENEWAL_THRESHOLD_SECS: u64 = 30 * 60;

/// Visible token prefix in log lines.
const TOKEN_LOG_PREFIX: usize = 8;

/// Result of validating the persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Token present and expiry strictly in the future
    Valid,
    /// Token present but expiry reached
    Expired,
    /// Token or expiry absent, malformed, or unreadable
    Missing,
}

impl SessionStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SessionStatus::Valid)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Valid => write!(f, "VALID"),
            SessionStatus::Expired => write!(f, "EXPIRED"),
            SessionStatus::Missing => write!(f, "MISSING"),
        }
    }
}

/// Session events for audit logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Created {
        token: String,
        expires_at: DateTime<Utc>,
    },
    Renewed {
        token: String,
        previous_expiry: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Expired {
        token: String,
        expired_at: DateTime<Utc>,
    },
    Destroyed {
        token: String,
    },
}

impl SessionEvent {
    /// Format event for audit log. Tokens are masked.
    pub fn to_audit_string(&self) -> String {
        match self {
            SessionEvent::Created { token, expires_at } => format!(
                "SESSION_CREATED | token={} expires={}",
                mask_sensitive(token, TOKEN_LOG_PREFIX),
                expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            SessionEvent::Renewed { token, previous_expiry, expires_at } => format!(
                "SESSION_RENEWED | token={} from={} to={}",
                mask_sensitive(token, TOKEN_LOG_PREFIX),
                previous_expiry.format("%Y-%m-%d %H:%M:%S UTC"),
                expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            SessionEvent::Expired { token, expired_at } => format!(
                "SESSION_EXPIRED | token={} at={}",
                mask_sensitive(token, TOKEN_LOG_PREFIX),
                expired_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            SessionEvent::Destroyed { token } => format!(
                "SESSION_DESTROYED | token={}",
                mask_sensitive(token, TOKEN_LOG_PREFIX)
            ),
        }
    }
}

/// Session timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Absolute lifetime granted at creation and at each renewal.
    pub session_duration_secs: u64,
    /// Renew when fewer than this many seconds remain.
    pub renewal_threshold_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            renewal_threshold_secs: DEFAULT_RENEWAL_THRESHOLD_SECS,
        }
    }
}

impl SessionPolicy {
    /// Build a policy, clamping the threshold below the duration.
    ///
    /// A threshold at or above the duration would renew on every check,
    /// which is exactly the sliding window this policy exists to avoid.
    pub fn custom(session_duration_secs: u64, renewal_threshold_secs: u64) -> Self {
        let session_duration_secs = session_duration_secs.max(1);
        let clamped_threshold = renewal_threshold_secs.min(session_duration_secs - 1);

        if clamped_threshold != renewal_threshold_secs {
            tracing::warn!(
                "SESSION_POLICY: renewal threshold {}s is not below session duration {}s. Clamped to {}s.",
                renewal_threshold_secs,
                session_duration_secs,
                clamped_threshold
            );
        }

        Self {
            session_duration_secs,
            renewal_threshold_secs: clamped_threshold,
        }
    }

    /// Expiry of a session issued or renewed at `now`.
    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        deadline_after(now, self.session_duration_secs).ok_or(AuthError::DeadlineOutOfRange {
            secs: self.session_duration_secs,
        })
    }

    fn threshold(&self) -> Duration {
        i64::try_from(self.renewal_threshold_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// A persisted admin session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Valid iff the expiry is strictly in the future.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.is_valid_at(now) {
            SessionStatus::Valid
        } else {
            SessionStatus::Expired
        }
    }
}

/// Owns the session half of the persisted auth record.
pub struct SessionManager {
    policy: SessionPolicy,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLogger>>,
}

impl SessionManager {
    pub fn new(policy: SessionPolicy, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            store,
            clock,
            audit: None,
        }
    }

    /// Also append session events to an audit log.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn emit(&self, event: &SessionEvent) {
        let line = event.to_audit_string();
        tracing::info!("{}", line);
        if let Some(audit) = &self.audit {
            audit.record(self.clock.now(), &line);
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Issue a new session. Only the login guard calls this.
    pub(crate) fn create(&self) -> Result<Session, AuthError> {
        let token = generate_session_token();
        let expires_at = self.policy.expiry_from(self.clock.now())?;

        self.store.set(keys::SESSION_TOKEN, &token)?;
        self.store.set(keys::SESSION_EXPIRES, &encode_timestamp(expires_at))?;

        let event = SessionEvent::Created {
            token: token.clone(),
            expires_at,
        };
        self.emit(&event);

        Ok(Session { token, expires_at })
    }

    /// Read the persisted session.
    ///
    /// `Ok(None)` when either key is absent or the expiry is malformed.
    pub fn current(&self) -> Result<Option<Session>, StoreError> {
        let Some(token) = self.store.get(keys::SESSION_TOKEN)? else {
            return Ok(None);
        };
        let Some(raw_expiry) = self.store.get(keys::SESSION_EXPIRES)? else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }
        match decode_timestamp(&raw_expiry) {
            Some(expires_at) => Ok(Some(Session { token, expires_at })),
            None => {
                tracing::warn!(
                    target: "security::session",
                    event = "SESSION_EXPIRY_MALFORMED",
                    "Stored session expiry is not a valid timestamp; treating session as missing"
                );
                Ok(None)
            }
        }
    }

    /// Validate without mapping storage failures.
    pub fn inspect(&self) -> Result<SessionStatus, StoreError> {
        let now = self.clock.now();
        Ok(match self.current()? {
            Some(session) => session.status_at(now),
            None => SessionStatus::Missing,
        })
    }

    /// Validate the persisted session. Performs no mutation.
    ///
    /// An unreadable store yields [`SessionStatus::Missing`].
    pub fn validate(&self) -> SessionStatus {
        match self.inspect() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    target: "security::session",
                    event = "SESSION_STORE_UNAVAILABLE",
                    error = %e,
                    "Could not read session state; failing closed"
                );
                SessionStatus::Missing
            }
        }
    }

    /// Extend the expiry if the session is valid and inside the renewal window.
    ///
    /// Returns the new expiry when a renewal happened, `None` when the session
    /// still has at least the threshold left. An absent or expired session is
    /// an error and is never renewed.
    pub fn maybe_renew(&self) -> Result<Option<DateTime<Utc>>, AuthError> {
        let now = self.clock.now();
        let session = self.current()?.ok_or(AuthError::SessionMissing)?;

        if !session.is_valid_at(now) {
            return Err(AuthError::SessionExpired);
        }

        let remaining = session.expires_at - now;
        if remaining >= self.policy.threshold() {
            tracing::debug!(
                remaining_secs = remaining.num_seconds(),
                "Session outside renewal window; no renewal"
            );
            return Ok(None);
        }

        let expires_at = self.policy.expiry_from(now)?;
        self.store.set(keys::SESSION_EXPIRES, &encode_timestamp(expires_at))?;

        let event = SessionEvent::Renewed {
            token: session.token,
            previous_expiry: session.expires_at,
            expires_at,
        };
        self.emit(&event);

        Ok(Some(expires_at))
    }

    /// Clear the session keys. Login attempt bookkeeping is left untouched.
    pub fn destroy(&self) -> Result<(), AuthError> {
        let token = self.store.get(keys::SESSION_TOKEN).ok().flatten();

        self.store.remove(keys::SESSION_TOKEN)?;
        self.store.remove(keys::SESSION_EXPIRES)?;

        match token {
            Some(token) => self.emit(&SessionEvent::Destroyed { token }),
            None => tracing::debug!("No session token to clear"),
        }
        Ok(())
    }

    /// Log that a session was found expired. Called by the owner before destroy.
    pub(crate) fn note_expired(&self) {
        if let Ok(Some(session)) = self.current() {
            let event = SessionEvent::Expired {
                token: session.token,
                expired_at: session.expires_at,
            };
            self.emit(&event);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
