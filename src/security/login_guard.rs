// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Login guard: credential check behind a progressive lockout.
//!
//! Every failed attempt increments a persisted failure counter. When the
//! counter reaches `max_attempts` a lockout window starts:
//!
//! ```text
//! duration = min(base ^ (failure_count - max_attempts + 1), max_lockout) seconds
//! ```
//!
//! While the window is open every attempt is rejected with
//! [`AuthError::Locked`] without being evaluated or counted. The first attempt
//! after the window closes clears the counter before it is evaluated, and a
//! successful login always clears it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::digest::Credential;
use super::session_manager::{Session, SessionManager};
use crate::audit::AuditLogger;
use crate::clock::{deadline_after, Clock};
use crate::errors::{AuthError, StoreError};
use crate::store::{decode_timestamp, encode_timestamp, keys, KeyValueStore};

/// Default consecutive failures before a lockout.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default exponential backoff base.
pub const DEFAULT_BACKOFF_BASE: u32 = 2;

/// Default lockout cap: 30 minutes.
pub const DEFAULT_MAX_LOCKOUT_SECS: u64 = 30 * 60;

/// Lockout tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub backoff_base: u32,
    pub max_lockout_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_lockout_secs: DEFAULT_MAX_LOCKOUT_SECS,
        }
    }
}

impl LockoutPolicy {
    /// Build a policy with at least one attempt and a base of at least 1.
    pub fn custom(max_attempts: u32, backoff_base: u32, max_lockout_secs: u64) -> Self {
        let clamped_attempts = max_attempts.max(1);
        let clamped_base = backoff_base.max(1);

        if clamped_attempts != max_attempts || clamped_base != backoff_base {
            tracing::warn!(
                "LOCKOUT_POLICY: max_attempts={} backoff_base={} out of range. Clamped to {} and {}.",
                max_attempts,
                backoff_base,
                clamped_attempts,
                clamped_base
            );
        }

        Self {
            max_attempts: clamped_attempts,
            backoff_base: clamped_base,
            max_lockout_secs,
        }
    }

    /// Lockout length for a given failure count, `None` below the threshold.
    ///
    /// Non-decreasing in `failure_count` and never above `max_lockout_secs`.
    pub fn lockout_secs(&self, failure_count: u32) -> Option<u64> {
        if failure_count < self.max_attempts {
            return None;
        }
        let exponent = failure_count - self.max_attempts + 1;
        let raw = u64::from(self.backoff_base)
            .checked_pow(exponent)
            .unwrap_or(u64::MAX);
        Some(raw.min(self.max_lockout_secs))
    }
}

/// Persisted failure bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptState {
    pub failure_count: u32,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl AttemptState {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.blocked_until, Some(until) if until > now)
    }

    /// Whole seconds left in the lockout, rounded up. `None` when not locked.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let until = self.blocked_until.filter(|until| *until > now)?;
        let remaining_ms = (until - now).num_milliseconds().max(0) as u64;
        Some(remaining_ms.div_ceil(1000).max(1))
    }

    /// A recorded lockout whose window has closed.
    fn lockout_elapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.blocked_until, Some(until) if until <= now)
    }
}

/// Guard events for audit logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardEvent {
    LoginSucceeded,
    LoginFailed {
        failure_count: u32,
    },
    LockoutStarted {
        failure_count: u32,
        duration_secs: u64,
        until: DateTime<Utc>,
    },
    LockoutRejected {
        retry_after_secs: u64,
    },
    LockoutExpired,
}

impl GuardEvent {
    /// Format event for audit log
    pub fn to_audit_string(&self) -> String {
        match self {
            GuardEvent::LoginSucceeded => "LOGIN_SUCCESS | counters cleared".to_string(),
            GuardEvent::LoginFailed { failure_count } => {
                format!("LOGIN_FAILED | failures={}", failure_count)
            }
            GuardEvent::LockoutStarted { failure_count, duration_secs, until } => format!(
                "LOCKOUT_STARTED | failures={} duration={}s until={}",
                failure_count,
                duration_secs,
                until.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            GuardEvent::LockoutRejected { retry_after_secs } => {
                format!("LOGIN_BLOCKED | retry_after={}s", retry_after_secs)
            }
            GuardEvent::LockoutExpired => "LOCKOUT_EXPIRED | counters cleared".to_string(),
        }
    }
}

/// Verifies credentials and owns the [`AttemptState`].
///
/// The only path that creates a session.
pub struct LoginGuard {
    credential: Credential,
    policy: LockoutPolicy,
    sessions: Arc<SessionManager>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLogger>>,
}

impl LoginGuard {
    pub fn new(
        credential: Credential,
        policy: LockoutPolicy,
        sessions: Arc<SessionManager>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credential,
            policy,
            sessions,
            store,
            clock,
            audit: None,
        }
    }

    /// Also append guard events to an audit log.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Check a submitted pair and issue a session on match.
    ///
    /// Empty strings are valid input; they simply fail the comparison.
    pub fn attempt_login(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let now = self.clock.now();
        let mut state = self.attempt_state()?;

        if let Some(retry_after_secs) = state.retry_after_secs(now) {
            self.emit(&GuardEvent::LockoutRejected { retry_after_secs });
            return Err(AuthError::Locked { retry_after_secs });
        }

        if state.lockout_elapsed(now) || state.failure_count >= self.policy.max_attempts {
            state = AttemptState::default();
            self.save_attempt_state(&state)?;
            self.emit(&GuardEvent::LockoutExpired);
        }

        if self.credential.matches(identifier, secret) {
            self.save_attempt_state(&AttemptState::default())?;
            self.emit(&GuardEvent::LoginSucceeded);
            return self.sessions.create();
        }

        state.failure_count = state.failure_count.saturating_add(1);
        match self.policy.lockout_secs(state.failure_count) {
            Some(duration_secs) => {
                let until = deadline_after(now, duration_secs)
                    .ok_or(AuthError::DeadlineOutOfRange { secs: duration_secs })?;
                state.blocked_until = Some(until);
                self.save_attempt_state(&state)?;
                self.emit(&GuardEvent::LockoutStarted {
                    failure_count: state.failure_count,
                    duration_secs,
                    until,
                });
            }
            None => {
                self.save_attempt_state(&state)?;
                self.emit(&GuardEvent::LoginFailed {
                    failure_count: state.failure_count,
                });
            }
        }

        Err(AuthError::InvalidCredentials)
    }

    /// Read the persisted attempt state without modifying it.
    ///
    /// Malformed values are treated as absent.
    pub fn attempt_state(&self) -> Result<AttemptState, StoreError> {
        let failure_count = match self.store.get(keys::LOGIN_ATTEMPTS)? {
            Some(raw) => raw.trim().parse::<u32>().unwrap_or_else(|_| {
                tracing::warn!(
                    target: "security::login_guard",
                    event = "ATTEMPT_COUNT_MALFORMED",
                    "Stored failure count is not a number; treating it as zero"
                );
                0
            }),
            None => 0,
        };

        let blocked_until = match self.store.get(keys::LOGIN_BLOCKED_UNTIL)? {
            Some(raw) => {
                let parsed = decode_timestamp(&raw);
                if parsed.is_none() {
                    tracing::warn!(
                        target: "security::login_guard",
                        event = "LOCKOUT_TIMESTAMP_MALFORMED",
                        "Stored lockout deadline is not a valid timestamp; ignoring it"
                    );
                }
                parsed
            }
            None => None,
        };

        Ok(AttemptState {
            failure_count,
            blocked_until,
        })
    }

    fn emit(&self, event: &GuardEvent) {
        let line = event.to_audit_string();
        match event {
            GuardEvent::LockoutStarted { .. } | GuardEvent::LockoutRejected { .. } => {
                tracing::warn!("{}", line)
            }
            _ => tracing::info!("{}", line),
        }
        if let Some(audit) = &self.audit {
            audit.record(self.clock.now(), &line);
        }
    }

    fn save_attempt_state(&self, state: &AttemptState) -> Result<(), StoreError> {
        if state.failure_count == 0 {
            self.store.remove(keys::LOGIN_ATTEMPTS)?;
        } else {
            self.store.set(keys::LOGIN_ATTEMPTS, &state.failure_count.to_string())?;
        }

        match state.blocked_until {
            Some(until) => self.store.set(keys::LOGIN_BLOCKED_UNTIL, &encode_timestamp(until)),
            None => self.store.remove(keys::LOGIN_BLOCKED_UNTIL),
        }
    }
}


// ============================================================================
// TESTS
// ============================================================================
