// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-backed auth record.
//!
//! The record is a flat JSON object of string values in `state.json`.
//! Access is coordinated through a sibling `state.lock` file: readers take a
//! shared lock, writers take an exclusive lock and replace the record with a
//! temp file + atomic rename while still holding it.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use super::KeyValueStore;
use crate::errors::StoreError;

/// Default timeout for acquiring file locks
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const STATE_FILE: &str = "state.json";

type Record = BTreeMap<String, String>;

/// JSON file store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FileStore {
    /// Store `state.json` inside `dir`. The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        Ok(file)
    }

    /// Retry a non-blocking lock until it succeeds or the timeout expires.
    fn acquire_with_timeout(
        file: &File,
        timeout: Duration,
        try_lock: fn(&File) -> std::io::Result<()>,
    ) -> Result<(), StoreError> {
        let start = Instant::now();
        loop {
            match try_lock(file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if start.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout(timeout));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }

    fn lock_shared(&self) -> Result<File, StoreError> {
        let file = self.open_lock_file()?;
        Self::acquire_with_timeout(&file, self.lock_timeout, |f| FileExt::try_lock_shared(f))?;
        Ok(file)
    }

    pub(crate) fn lock_exclusive(&self) -> Result<File, StoreError> {
        let file = self.open_lock_file()?;
        Self::acquire_with_timeout(&file, self.lock_timeout, |f| FileExt::try_lock_exclusive(f))?;
        Ok(file)
    }

    /// Read the record. Caller holds a lock.
    fn read_record(&self) -> Result<Record, StoreError> {
        if !self.path.exists() {
            return Ok(Record::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Record::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Read the record for modification. A corrupt record is discarded so a
    /// write (typically logout) can bring the store back to a usable state.
    /// The flag is `true` when that happened.
    fn read_record_for_update(&self) -> Result<(Record, bool), StoreError> {
        match self.read_record() {
            Ok(record) => Ok((record, false)),
            Err(StoreError::Corrupt(e)) => {
                tracing::warn!(
                    target: "store::file",
                    event = "STATE_FILE_CORRUPT",
                    path = %self.path.display(),
                    error = %e,
                    "Auth state file is corrupt; rebuilding it from empty"
                );
                Ok((Record::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the record. Caller holds the exclusive lock.
    fn write_record(&self, record: &Record) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(record)?;

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            temp_file.write_all(content.as_bytes())?;
            temp_file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Record) -> bool) -> Result<(), StoreError> {
        let _lock_guard = self.lock_exclusive()?;
        let (mut record, rebuilt) = self.read_record_for_update()?;
        if apply(&mut record) || rebuilt {
            self.write_record(&record)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _lock_guard = self.lock_shared()?;
        let mut record = self.read_record()?;
        Ok(record.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|record| {
            record.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|record| record.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keys;
    use tempfile::TempDir;

    #[test]
    fn test_get_on_missing_file_is_none() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path());

        assert_eq!(store.get(keys::SESSION_TOKEN).unwrap(), None);
        assert!(store.remove(keys::SESSION_TOKEN).is_ok());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_values_survive_a_new_handle() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        FileStore::new(dir.path())
            .set(keys::LOGIN_ATTEMPTS, "2")
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get(keys::LOGIN_ATTEMPTS).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_leaves_other_keys() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path());
        store.set(keys::SESSION_TOKEN, "tok").unwrap();
        store.set(keys::SESSION_EXPIRES, "2030-01-01T00:00:00.000Z").unwrap();
        store.set(keys::LOGIN_ATTEMPTS, "1").unwrap();

        store.remove(keys::SESSION_TOKEN).unwrap();
        store.remove(keys::SESSION_EXPIRES).unwrap();

        assert_eq!(store.get(keys::SESSION_TOKEN).unwrap(), None);
        assert_eq!(store.get(keys::LOGIN_ATTEMPTS).unwrap().as_deref(), Some("1"));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_fails_reads_but_heals_on_write() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path());
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(
            store.get(keys::SESSION_TOKEN),
            Err(StoreError::Corrupt(_))
        ));

        store.remove(keys::SESSION_TOKEN).unwrap();
        assert_eq!(store.get(keys::SESSION_TOKEN).unwrap(), None);

        store.set(keys::LOGIN_ATTEMPTS, "1").unwrap();
        assert_eq!(store.get(keys::LOGIN_ATTEMPTS).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_writer_times_out_while_lock_is_held() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path()).with_lock_timeout(Duration::from_millis(100));
        store.set(keys::LOGIN_ATTEMPTS, "1").unwrap();

        let _held = store.lock_exclusive().expect("first exclusive lock");

        let result = store.set(keys::LOGIN_ATTEMPTS, "2");
        assert!(matches!(result, Err(StoreError::LockTimeout(_))));
    }

    #[test]
    fn test_readers_share_the_lock() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::new(dir.path()).with_lock_timeout(Duration::from_millis(100));
        store.set(keys::SESSION_TOKEN, "tok").unwrap();

        let _reader = store.lock_shared().expect("first shared lock");
        assert_eq!(store.get(keys::SESSION_TOKEN).unwrap().as_deref(), Some("tok"));
    }
}
