// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! vitrine - admin authentication for the landing-page back office
//!
//! Gates the administrative surface behind a single operator credential:
//!
//! **Login guard** (failure counter, exponential lockout) -> **Session**
//! (opaque token, absolute expiry, renewal near expiry) -> **Recurring check**
//!
//! # Core Modules
//!
//! - [`auth`] - The [`AdminAuth`] facade: login, check, logout, status
//! - [`security`] - Login guard, session manager, recurring check
//! - [`store`] - Persisted key-value record (file and in-memory backends)
//! - [`config`] - Deploy-time configuration and environment overrides
//! - [`audit`] - Append-only auth event log
//! - [`clock`] - Injectable time source
//! - [`errors`] - Error types returned at the core boundary

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod errors;
pub mod security;
pub mod store;
pub mod utils;

pub use auth::{AdminAuth, AuthStatus, LoginFailure, LoginOutcome, LogoutReason, SessionCheck};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use errors::{AuthError, ConfigError, StoreError};
pub use security::{SessionStatus, SessionWatch, WatchEvent};
pub use store::{FileStore, KeyValueStore, MemoryStore};
