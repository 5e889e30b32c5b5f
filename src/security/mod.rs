// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security controls for the admin area.
//!
//! - [`login_guard`]: credential check with exponential, capped lockout
//! - [`session_manager`]: session issue, validation, renewal and destruction
//! - [`watch`]: the cancellable recurring session check
//! - [`digest`] and [`token`]: salted credential digests and session tokens
//! - [`locks`]: poison-tolerant lock helpers
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vitrine::clock::SystemClock;
//! use vitrine::security::{Credential, LockoutPolicy, LoginGuard, SessionManager, SessionPolicy};
//! use vitrine::store::MemoryStore;
//!
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(SystemClock);
//! let sessions = Arc::new(SessionManager::new(SessionPolicy::default(), store.clone(), clock.clone()));
//! let guard = LoginGuard::new(
//!     Credential::new("admin", "s3cret!", "pepper"),
//!     LockoutPolicy::default(),
//!     sessions.clone(),
//!     store,
//!     clock,
//! );
//!
//! if guard.attempt_login("admin", "s3cret!").is_ok() {
//!     assert!(sessions.validate().is_valid());
//! }
//! ```

pub mod digest;
pub mod locks;
pub mod login_guard;
pub mod session_manager;
pub mod token;
pub mod watch;

pub use digest::Credential;
pub use locks::{resilient_lock, resilient_read, resilient_write};
pub use login_guard::{AttemptState, GuardEvent, LockoutPolicy, LoginGuard};
pub use session_manager::{Session, SessionEvent, SessionManager, SessionPolicy, SessionStatus};
pub use watch::{SessionWatch, WatchEvent};
