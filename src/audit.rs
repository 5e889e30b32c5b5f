// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Audit log for admin authentication events.
//!
//! Every login attempt, lockout, and session transition is appended as one
//! line to `<state dir>/audit.log`:
//!
//! `2024-01-15 10:23:45 | LOGIN_FAILED | failures=2`
//!
//! Lines are produced by the `to_audit_string` methods of the guard and
//! session events, which never contain a full token or any credential.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::security::locks::{resilient_read, resilient_write};

/// File name of the audit log inside the state directory.
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// Entries kept in memory for `recent_entries`.
const RECENT_CAPACITY: usize = 256;

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// `EVENT_NAME | key=value ...`
    pub detail: String,
}

impl AuditEntry {
    pub fn new(timestamp: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            timestamp,
            detail: single_line(&detail.into()),
        }
    }

    /// Event name, the text before the first `|`.
    pub fn event_name(&self) -> &str {
        self.detail.split('|').next().unwrap_or("").trim()
    }

    /// Format as a log line
    pub fn to_log_line(&self) -> String {
        let local_time: DateTime<Local> = self.timestamp.into();
        format!("{} | {}", local_time.format("%Y-%m-%d %H:%M:%S"), self.detail)
    }
}

/// Collapse control characters so one entry is always one line.
fn single_line(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Append-only audit sink.
#[derive(Debug)]
pub struct AuditLogger {
    log_path: PathBuf,
    enabled: bool,
    recent_entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLogger {
    /// Create a logger writing to `dir/audit.log`. The directory is created
    /// when logging is enabled.
    pub fn new(dir: impl AsRef<Path>, enabled: bool) -> Result<Self> {
        let dir = dir.as_ref();
        if enabled {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create audit log directory {}", dir.display()))?;
        }

        Ok(Self {
            log_path: dir.join(AUDIT_LOG_FILE),
            enabled,
            recent_entries: RwLock::new(Vec::new()),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append an entry.
    pub fn log(&self, entry: AuditEntry) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        {
            let mut recent = resilient_write(&self.recent_entries);
            recent.push(entry.clone());
            if recent.len() > RECENT_CAPACITY {
                recent.remove(0);
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open audit log {}", self.log_path.display()))?;

        // one write per line keeps concurrent appends from interleaving
        let mut line = entry.to_log_line();
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Append a line, reporting failure through tracing only.
    ///
    /// An unwritable audit log never changes the outcome of an auth operation.
    pub fn record(&self, at: DateTime<Utc>, detail: &str) {
        if let Err(e) = self.log(AuditEntry::new(at, detail)) {
            tracing::warn!(
                target: "audit",
                event = "AUDIT_WRITE_FAILED",
                error = %e,
                "Could not append to audit log"
            );
        }
    }

    /// Entries written by this logger since it was created.
    pub fn recent_entries(&self) -> Vec<AuditEntry> {
        resilient_read(&self.recent_entries).clone()
    }

    /// Read all lines from the log file
    pub fn read_all_entries(&self) -> Result<Vec<String>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)?;
        Ok(content.lines().map(String::from).collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_line_format() {
        let entry = AuditEntry::new(Utc::now(), "LOGIN_FAILED | failures=2");
        let line = entry.to_log_line();

        assert!(line.ends_with(" | LOGIN_FAILED | failures=2"));
        assert_eq!(entry.event_name(), "LOGIN_FAILED");
    }

    #[test]
    fn test_entry_is_single_line() {
        let entry = AuditEntry::new(Utc::now(), "LOGIN_FAILED\n| forged=1");
        assert!(!entry.to_log_line().contains('\n'));
    }

    #[test]
    fn test_logger_appends_lines() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let logger = AuditLogger::new(dir.path(), true).unwrap();

        logger.record(Utc::now(), "LOGIN_SUCCESS | counters cleared");
        logger.record(Utc::now(), "SESSION_DESTROYED | token=none");

        let lines = logger.read_all_entries().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("LOGIN_SUCCESS"));
        assert!(lines[1].contains("SESSION_DESTROYED"));
        assert_eq!(logger.recent_entries().len(), 2);
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let logger = AuditLogger::new(dir.path().join("nested"), false).unwrap();

        logger.record(Utc::now(), "LOGIN_SUCCESS | counters cleared");

        assert!(!logger.log_path().exists());
        assert!(logger.read_all_entries().unwrap().is_empty());
        assert!(logger.recent_entries().is_empty());
    }

    #[test]
    fn test_recent_entries_are_capped() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let logger = AuditLogger::new(dir.path(), true).unwrap();

        for i in 0..(RECENT_CAPACITY + 10) {
            logger.record(Utc::now(), &format!("LOGIN_FAILED | failures={}", i));
        }

        let recent = logger.recent_entries();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent[0].detail, "LOGIN_FAILED | failures=10");
    }
}
