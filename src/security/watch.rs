// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Recurring session check.
//!
//! While the admin area is open, [`SessionWatch`] runs [`AdminAuth::check`]
//! once immediately and then on a fixed interval. Checks run on the blocking
//! pool, since a file-backed store may wait on its lock. Each tick completes
//! before the next one can start: ticks missed while a check runs are
//! skipped, not queued. The task stops after reporting a forced logout, or when the owner
//! cancels or drops the handle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::auth::{AdminAuth, LogoutReason, SessionCheck};

/// What a check changed, as seen by the owner of the protected area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Renewed { expires_at: DateTime<Utc> },
    LoggedOut { reason: LogoutReason },
}

/// Handle to a running recurring check.
pub struct SessionWatch {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl SessionWatch {
    /// Start checking `auth` every `period`. Must be called inside a tokio
    /// runtime.
    pub fn spawn(auth: Arc<AdminAuth>, period: Duration) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Session watch cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        // store I/O can wait on a file lock; keep it off the async workers
                        let checked = Arc::clone(&auth);
                        let outcome = match tokio::task::spawn_blocking(move || checked.check()).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                tracing::warn!(error = %e, "Session check did not complete; logging out");
                                SessionCheck::LoggedOut {
                                    reason: LogoutReason::StorageUnavailable,
                                }
                            }
                        };
                        match outcome {
                            SessionCheck::Active { renewed: Some(expires_at) } => {
                                let _ = events_tx.send(WatchEvent::Renewed { expires_at });
                            }
                            SessionCheck::Active { renewed: None } => {}
                            SessionCheck::LoggedOut { reason } => {
                                tracing::info!(reason = %reason, "Session watch forced logout");
                                let _ = events_tx.send(WatchEvent::LoggedOut { reason });
                                break;
                            }
                        }
                    }
                }
            }
        });

        (
            Self {
                handle: Some(handle),
                shutdown: Some(shutdown_tx),
            },
            events_rx,
        )
    }

    /// Stop the task and wait until it has exited. No check runs after this
    /// returns.
    pub async fn cancel(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AuthConfig;
    use crate::store::{FileStore, MemoryStore};
    use std::time::Instant;

    fn auth(clock: &ManualClock) -> Arc<AdminAuth> {
        let config = AuthConfig {
            admin_user: "operator".to_string(),
            admin_secret: "s3cret!".to_string(),
            salt: "pepper".to_string(),
            ..AuthConfig::default()
        };
        Arc::new(AdminAuth::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(clock.clone()),
        ))
    }

    #[tokio::test]
    async fn test_watch_without_session_logs_out_immediately() {
        let clock = ManualClock::at_epoch();
        let (watch, mut events) = SessionWatch::spawn(auth(&clock), Duration::from_secs(300));

        let event = events.recv().await;
        assert_eq!(
            event,
            Some(WatchEvent::LoggedOut {
                reason: LogoutReason::Invalid
            })
        );
        watch.cancel().await;
    }

    #[tokio::test]
    async fn test_watch_reports_renewal_then_expiry() {
        let clock = ManualClock::at_epoch();
        let auth = auth(&clock);
        assert!(auth.login("operator", "s3cret!").ok);
        clock.advance_secs(5500);

        let (watch, mut events) = SessionWatch::spawn(auth.clone(), Duration::from_millis(20));

        match events.recv().await {
            Some(WatchEvent::Renewed { expires_at }) => {
                assert_eq!(expires_at, DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(12700));
            }
            other => panic!("expected renewal, got {:?}", other),
        }

        clock.advance_secs(10_000);
        assert_eq!(
            events.recv().await,
            Some(WatchEvent::LoggedOut {
                reason: LogoutReason::Expired
            })
        );
        assert!(!auth.is_authenticated());
        watch.cancel().await;
    }

    #[tokio::test]
    async fn test_contended_store_does_not_stall_runtime() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(FileStore::new(dir.path()).with_lock_timeout(Duration::from_millis(800)));
        let clock = ManualClock::at_epoch();
        let config = AuthConfig {
            admin_user: "operator".to_string(),
            admin_secret: "s3cret!".to_string(),
            salt: "pepper".to_string(),
            ..AuthConfig::default()
        };
        let auth = Arc::new(AdminAuth::new(&config, store.clone(), Arc::new(clock.clone())));
        assert!(auth.login("operator", "s3cret!").ok);

        let held = store.lock_exclusive().expect("exclusive lock");
        let (watch, _events) = SessionWatch::spawn(auth.clone(), Duration::from_secs(300));

        // single-threaded runtime: this timer only fires if the check is not
        // blocking the worker
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(400));

        drop(held);
        watch.cancel().await;
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_cancel_stops_the_task() {
        let clock = ManualClock::at_epoch();
        let auth = auth(&clock);
        assert!(auth.login("operator", "s3cret!").ok);

        let (watch, mut events) = SessionWatch::spawn(auth, Duration::from_millis(10));
        watch.cancel().await;

        // sender dropped with the task
        assert_eq!(events.recv().await, None);
    }
}
