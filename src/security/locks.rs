// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! A panic while one of the auth core's locks is held marks the lock as
//! poisoned. Propagating that poison would turn every later login or session
//! check into a panic, so these helpers recover the guard and log a security
//! event instead. The state behind the lock is a handful of timestamps and
//! counters that are re-read from the store on every operation, so the worst
//! outcome of recovering is a stale in-memory copy, never an unlocked admin
//! area.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::RwLock;
//! use vitrine::security::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(42);
//! let value = *resilient_read(&lock);
//! *resilient_write(&lock) = value + 1;
//! ```

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition; recovering. \
                 A thread previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition; recovering. \
                 A thread previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a mutex, recovering from poisoning if necessary.
///
/// Used to serialize the read-decide-write sequences of the auth facade.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_MUTEX",
                "Mutex was poisoned during acquisition; recovering. \
                 A previous auth operation panicked mid-flight."
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_write_then_read() {
        let lock = RwLock::new(42);
        {
            let mut guard = resilient_write(&lock);
            *guard = 100;
        }
        assert_eq!(*resilient_read(&lock), 100);
    }

    #[test]
    fn test_resilient_read_poisoned() {
        let lock = Arc::new(RwLock::new(7));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        assert!(lock.is_poisoned());
        assert_eq!(*resilient_read(&lock), 7);
    }

    #[test]
    fn test_resilient_lock_poisoned() {
        let lock = Arc::new(Mutex::new(Vec::<u32>::new()));
        let lock_clone = Arc::clone(&lock);

        let handle = thread::spawn(move || {
            let mut guard = lock_clone.lock().unwrap();
            guard.push(1);
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        let mut guard = resilient_lock(&lock);
        guard.push(2);
        assert_eq!(*guard, vec![1, 2]);
    }
}
