// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted key-value record backing the auth core.
//!
//! The login guard and session manager keep their state (session token,
//! session expiry, failure count, lockout deadline) in a small string map
//! that survives restarts. Each key is read and written independently and
//! an absent key is a normal state, not an error.
//!
//! Two backends are provided:
//! - [`FileStore`]: a JSON file under the state directory, guarded by an
//!   OS file lock so concurrent processes never see a torn write.
//! - [`MemoryStore`]: a process-local map, used by tests and embedders.

pub mod file;

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::StoreError;
use crate::security::locks::{resilient_read, resilient_write};

pub use file::FileStore;

/// Keys of the persisted auth record.
pub mod keys {
    /// Opaque session token.
    pub const SESSION_TOKEN: &str = "admin_auth";
    /// Session expiry, RFC 3339.
    pub const SESSION_EXPIRES: &str = "admin_auth_expires";
    /// Consecutive failed login attempts, decimal.
    pub const LOGIN_ATTEMPTS: &str = "login_attempts";
    /// End of the current lockout window, RFC 3339.
    pub const LOGIN_BLOCKED_UNTIL: &str = "login_blocked_until";
}

/// Get/set/remove by key.
///
/// Implementations must make each call atomic on its own; callers that need
/// a read-modify-write sequence serialize it themselves.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Encode a timestamp the way every timestamp key is stored.
pub fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. `None` means the value is malformed.
pub fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present.
    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(resilient_read(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        resilient_write(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        resilient_write(&self.entries).remove(key);
        Ok(())
    }
}
