// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Race Detection Tests for vitrine
//!
//! These tests drive one shared `AdminAuth` from many tasks at once and check
//! that the read-decide-write sequences of login, check and logout never
//! interleave. They are also meant to be run under ThreadSanitizer.
//!
//! # Running with ThreadSanitizer
//!
//! ```bash
//! RUSTFLAGS="-Z sanitizer=thread" cargo +nightly test --target x86_64-unknown-linux-gnu --test race_detection_test
//! ```
//!
//! # Test Categories
//!
//! - Failure counting under concurrent submissions
//! - Lockout engagement under concurrent submissions
//! - Concurrent checks around renewal and expiry
//! - Mixed login/check/logout against the file store
//! - Audit logging thread safety

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use vitrine::audit::AuditLogger;
use vitrine::store::keys;
use vitrine::{
    AdminAuth, AuthConfig, FileStore, KeyValueStore, LoginFailure, ManualClock, MemoryStore,
    SessionCheck,
};

// Test configuration
const CONCURRENCY_LEVEL: usize = 100;
const ITERATIONS_PER_TASK: usize = 20;
const TEST_TIMEOUT_SECS: u64 = 30;

const USER: &str = "operator";
const SECRET: &str = "s3cret!";

fn config() -> AuthConfig {
    AuthConfig {
        admin_user: USER.to_string(),
        admin_secret: SECRET.to_string(),
        salt: "pepper".to_string(),
        ..AuthConfig::default()
    }
}

fn shared_auth(config: &AuthConfig) -> (Arc<AdminAuth>, ManualClock, Arc<MemoryStore>) {
    let clock = ManualClock::at_epoch();
    let store = Arc::new(MemoryStore::new());
    let auth = Arc::new(AdminAuth::new(config, store.clone(), Arc::new(clock.clone())));
    (auth, clock, store)
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<()>>) {
    let result = timeout(Duration::from_secs(TEST_TIMEOUT_SECS), async {
        for handle in handles {
            handle.await.expect("Task panicked");
        }
    })
    .await;

    assert!(result.is_ok(), "Test timed out");
}

// =============================================================================
// LOGIN GUARD CONCURRENCY
// =============================================================================

/// Every concurrent failure is counted exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let config = AuthConfig {
        max_login_attempts: 100_000,
        ..config()
    };
    let (auth, _clock, _store) = shared_auth(&config);
    let mut handles = vec![];

    for _ in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS_PER_TASK {
                let outcome = auth.login(USER, "wrong");
                assert_eq!(outcome.kind, Some(LoginFailure::Invalid));
            }
        }));
    }

    join_all(handles).await;

    let status = auth.status().unwrap();
    assert_eq!(
        status.failure_count as usize,
        CONCURRENCY_LEVEL * ITERATIONS_PER_TASK
    );
}

/// Concurrent submissions engage the lockout exactly at the threshold
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_respect_lockout() {
    let (auth, _clock, store) = shared_auth(&config());
    let invalid = Arc::new(AtomicU64::new(0));
    let locked = Arc::new(AtomicU64::new(0));
    let succeeded = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        let invalid = invalid.clone();
        let locked = locked.clone();
        let succeeded = succeeded.clone();
        handles.push(tokio::spawn(async move {
            // a quarter of the tasks submit the right secret; once locked it
            // must not matter
            let secret = if i % 4 == 0 { SECRET } else { "wrong" };
            let outcome = auth.login(USER, secret);
            match outcome.kind {
                None => {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                }
                Some(LoginFailure::Invalid) => {
                    invalid.fetch_add(1, Ordering::Relaxed);
                }
                Some(LoginFailure::Locked) => {
                    locked.fetch_add(1, Ordering::Relaxed);
                }
                Some(LoginFailure::Unavailable) => panic!("memory store reported unavailable"),
            }
        }));
    }

    join_all(handles).await;

    let status = auth.status().unwrap();
    assert!(status.failure_count <= 3);
    if status.failure_count == 3 {
        assert!(status.locked_for_secs.is_some());
        assert!(store.get(keys::LOGIN_BLOCKED_UNTIL).unwrap().is_some());
    }
    let (invalid, locked, succeeded) = (
        invalid.load(Ordering::Relaxed),
        locked.load(Ordering::Relaxed),
        succeeded.load(Ordering::Relaxed),
    );
    assert_eq!(invalid + locked + succeeded, CONCURRENCY_LEVEL as u64);
    println!(
        "{} succeeded, {} invalid, {} locked, final failure count {}",
        succeeded, invalid, locked, status.failure_count
    );
}

/// All wrong submissions with no success in between lock after exactly three
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_only_submissions_lock_after_threshold() {
    let (auth, _clock, _store) = shared_auth(&config());
    let invalid = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for _ in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        let invalid = invalid.clone();
        handles.push(tokio::spawn(async move {
            if auth.login(USER, "wrong").kind == Some(LoginFailure::Invalid) {
                invalid.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    join_all(handles).await;

    assert_eq!(invalid.load(Ordering::Relaxed), 3);
    let status = auth.status().unwrap();
    assert_eq!(status.failure_count, 3);
    assert_eq!(status.locked_for_secs, Some(2));
}

/// Status snapshots taken during lockout engagement are never half-written
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_never_sees_count_without_lockout() {
    let (auth, _clock, _store) = shared_auth(&config());
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let _ = auth.login(USER, "wrong");
            } else {
                for _ in 0..ITERATIONS_PER_TASK {
                    let status = auth.status().unwrap();
                    // the clock is frozen, so a reached threshold stays locked
                    if status.failure_count >= 3 {
                        assert!(
                            status.locked_for_secs.is_some(),
                            "count {} without lockout",
                            status.failure_count
                        );
                    }
                }
            }
        }));
    }

    join_all(handles).await;

    assert_eq!(auth.status().unwrap().locked_for_secs, Some(2));
}

// =============================================================================
// SESSION CHECK CONCURRENCY
// =============================================================================

/// Concurrent checks inside the renewal window all agree on one expiry
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_renew_consistently() {
    let (auth, clock, store) = shared_auth(&config());
    assert!(auth.login(USER, SECRET).ok);
    let token = store.get(keys::SESSION_TOKEN).unwrap();
    clock.advance_secs(5500);

    let renewals = Arc::new(AtomicU64::new(0));
    let mut handles = vec![];

    for _ in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        let renewals = renewals.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS_PER_TASK {
                match auth.check() {
                    SessionCheck::Active { renewed: Some(_) } => {
                        renewals.fetch_add(1, Ordering::Relaxed);
                    }
                    SessionCheck::Active { renewed: None } => {}
                    SessionCheck::LoggedOut { reason } => {
                        panic!("valid session logged out: {}", reason)
                    }
                }
            }
        }));
    }

    join_all(handles).await;

    // clock is frozen, so only the first check is inside the window
    assert_eq!(renewals.load(Ordering::Relaxed), 1);
    assert_eq!(store.get(keys::SESSION_TOKEN).unwrap(), token);
    assert_eq!(
        store.get(keys::SESSION_EXPIRES).unwrap().as_deref(),
        Some("1970-01-01T03:31:40.000Z")
    );
}

/// An expired session is never resurrected by concurrent checks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_session_stays_dead_under_concurrent_checks() {
    let (auth, clock, store) = shared_auth(&config());
    assert!(auth.login(USER, SECRET).ok);
    clock.advance_secs(7200);

    let mut handles = vec![];
    for _ in 0..CONCURRENCY_LEVEL {
        let auth = auth.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS_PER_TASK {
                assert!(!auth.is_authenticated());
            }
        }));
    }

    join_all(handles).await;

    assert_eq!(store.get(keys::SESSION_TOKEN).unwrap(), None);
    assert_eq!(store.get(keys::SESSION_EXPIRES).unwrap(), None);
}

// =============================================================================
// MIXED OPERATIONS AGAINST THE FILE STORE
// =============================================================================

/// Login, check and logout from many tasks without deadlock or torn state
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_operations_on_file_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(FileStore::new(dir.path()));
    let clock = ManualClock::at_epoch();
    let auth = Arc::new(AdminAuth::new(&config(), store.clone(), Arc::new(clock.clone())));
    let mut handles = vec![];

    for i in 0..16 {
        let auth = auth.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                match i % 4 {
                    0 => {
                        let _ = auth.login(USER, SECRET);
                    }
                    1 | 2 => {
                        let _ = auth.check();
                    }
                    _ => {
                        auth.logout().expect("logout failed");
                    }
                }
            }
        }));
    }

    join_all(handles).await;

    // whatever the interleaving, the record is readable and consistent
    let token = store.get(keys::SESSION_TOKEN).unwrap();
    let expires = store.get(keys::SESSION_EXPIRES).unwrap();
    assert_eq!(token.is_some(), expires.is_some());
    assert_eq!(auth.status().unwrap().failure_count, 0);
}

// =============================================================================
// AUDIT CONCURRENCY
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_concurrent_logging() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let audit = Arc::new(AuditLogger::new(dir.path(), true).unwrap());
    let mut handles = vec![];

    for i in 0..CONCURRENCY_LEVEL {
        let audit = audit.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..ITERATIONS_PER_TASK {
                audit.record(
                    chrono::Utc::now(),
                    &format!("LOGIN_FAILED | task={} iteration={}", i, j),
                );
            }
        }));
    }

    join_all(handles).await;

    let lines = audit.read_all_entries().unwrap();
    assert_eq!(lines.len(), CONCURRENCY_LEVEL * ITERATIONS_PER_TASK);
    assert!(lines.iter().all(|line| line.contains("| LOGIN_FAILED | task=")));
}
