// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deploy-time configuration for the admin auth core.
//!
//! Loaded once from `~/.vitrine/config.json`, then overridden by the
//! `VITRINE_*` environment variables below. The values are immutable for the
//! life of the process.
//!
//! | Variable               | Field          |
//! |------------------------|----------------|
//! | `VITRINE_ADMIN_USER`   | `admin_user`   |
//! | `VITRINE_ADMIN_SECRET` | `admin_secret` |
//! | `VITRINE_ADMIN_SALT`   | `salt`         |
//! | `VITRINE_STATE_DIR`    | `state_dir`    |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::security::digest::Credential;
use crate::security::login_guard::{
    LockoutPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_LOCKOUT_SECS,
};
use crate::security::session_manager::{
    SessionPolicy, DEFAULT_RENEWAL_THRESHOLD_SECS, DEFAULT_SESSION_DURATION_SECS,
};

pub const ENV_ADMIN_USER: &str = "VITRINE_ADMIN_USER";
pub const ENV_ADMIN_SECRET: &str = "VITRINE_ADMIN_SECRET";
pub const ENV_ADMIN_SALT: &str = "VITRINE_ADMIN_SALT";
pub const ENV_STATE_DIR: &str = "VITRINE_STATE_DIR";

/// Default interval of the recurring session check: 5 minutes.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5 * 60;

/// Longest accepted duration setting, 100 years. Keeps every deadline
/// representable as a timestamp.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

const CONFIG_FILE: &str = "config.json";
const MASK: &str = "********";

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Operator identifier (default: "admin")
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// Operator secret. Required.
    #[serde(default)]
    pub admin_secret: String,
    /// Salt mixed into both credential digests. Required.
    #[serde(default)]
    pub salt: String,
    /// Absolute session lifetime (default: 2 hours)
    #[serde(default = "default_session_duration_secs")]
    pub session_duration_secs: u64,
    /// Renew when less than this remains (default: 30 minutes)
    #[serde(default = "default_renewal_threshold_secs")]
    pub renewal_threshold_secs: u64,
    /// Consecutive failures before lockout (default: 3)
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    /// Exponential backoff base in seconds (default: 2)
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    /// Lockout cap (default: 30 minutes)
    #[serde(default = "default_max_lockout_secs")]
    pub max_lockout_secs: u64,
    /// Recurring session check interval (default: 5 minutes)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Append auth events to `audit.log` (default: true)
    #[serde(default = "default_audit_log_enabled")]
    pub audit_log_enabled: bool,
    /// Where the auth record and audit log live (default: ~/.vitrine)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_session_duration_secs() -> u64 {
    DEFAULT_SESSION_DURATION_SECS
}

fn default_renewal_threshold_secs() -> u64 {
    DEFAULT_RENEWAL_THRESHOLD_SECS
}

fn default_max_login_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base() -> u32 {
    DEFAULT_BACKOFF_BASE
}

fn default_max_lockout_secs() -> u64 {
    DEFAULT_MAX_LOCKOUT_SECS
}

fn default_check_interval_secs() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_audit_log_enabled() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_user: default_admin_user(),
            admin_secret: String::new(),
            salt: String::new(),
            session_duration_secs: default_session_duration_secs(),
            renewal_threshold_secs: default_renewal_threshold_secs(),
            max_login_attempts: default_max_login_attempts(),
            backoff_base: default_backoff_base(),
            max_lockout_secs: default_max_lockout_secs(),
            check_interval_secs: default_check_interval_secs(),
            audit_log_enabled: default_audit_log_enabled(),
            state_dir: None,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("admin_user", &self.admin_user)
            .field("admin_secret", &MASK)
            .field("salt", &MASK)
            .field("session_duration_secs", &self.session_duration_secs)
            .field("renewal_threshold_secs", &self.renewal_threshold_secs)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("max_lockout_secs", &self.max_lockout_secs)
            .field("check_interval_secs", &self.check_interval_secs)
            .field("audit_log_enabled", &self.audit_log_enabled)
            .field("state_dir", &self.state_dir)
            .finish()
    }
}

/// `~/.vitrine`. Not created here.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".vitrine"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

impl AuthConfig {
    /// Load from the default path, apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply `VITRINE_*` overrides. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(user) = lookup(ENV_ADMIN_USER) {
            self.admin_user = user;
        }
        if let Some(secret) = lookup(ENV_ADMIN_SECRET) {
            self.admin_secret = secret;
        }
        if let Some(salt) = lookup(ENV_ADMIN_SALT) {
            self.salt = salt;
        }
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            self.state_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_user.is_empty() {
            return Err(ConfigError::new("admin_user", "must not be empty"));
        }
        if self.admin_secret.is_empty() {
            return Err(ConfigError::new(
                "admin_secret",
                format!("must be set in {} or ${}", CONFIG_FILE, ENV_ADMIN_SECRET),
            ));
        }
        if self.salt.is_empty() {
            return Err(ConfigError::new(
                "salt",
                format!("must be set in {} or ${}", CONFIG_FILE, ENV_ADMIN_SALT),
            ));
        }
        for (field, secs) in [
            ("session_duration_secs", self.session_duration_secs),
            ("max_lockout_secs", self.max_lockout_secs),
            ("check_interval_secs", self.check_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::new(
                    field,
                    format!("must be at most {} (100 years)", MAX_DURATION_SECS),
                ));
            }
        }
        if self.session_duration_secs == 0 {
            return Err(ConfigError::new("session_duration_secs", "must be greater than 0"));
        }
        if self.renewal_threshold_secs == 0 {
            return Err(ConfigError::new("renewal_threshold_secs", "must be greater than 0"));
        }
        if self.renewal_threshold_secs >= self.session_duration_secs {
            return Err(ConfigError::new(
                "renewal_threshold_secs",
                "must be less than session_duration_secs",
            ));
        }
        if self.max_login_attempts == 0 {
            return Err(ConfigError::new("max_login_attempts", "must be at least 1"));
        }
        if self.backoff_base == 0 {
            return Err(ConfigError::new("backoff_base", "must be at least 1"));
        }
        if self.max_lockout_secs == 0 {
            return Err(ConfigError::new("max_lockout_secs", "must be greater than 0"));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::new("check_interval_secs", "must be greater than 0"));
        }
        Ok(())
    }

    /// Directory holding `state.json` and `audit.log`.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }

    pub fn credential(&self) -> Credential {
        Credential::new(&self.admin_user, &self.admin_secret, self.salt.clone())
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::custom(self.max_login_attempts, self.backoff_base, self.max_lockout_secs)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy::custom(self.session_duration_secs, self.renewal_threshold_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// JSON view with the secret and salt masked, for `config show`.
    pub fn to_masked_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self)?;
        for field in ["admin_secret", "salt"] {
            if let Some(slot) = value.get_mut(field) {
                let set = slot.as_str().is_some_and(|s| !s.is_empty());
                *slot = serde_json::Value::String(if set { MASK } else { "(unset)" }.to_string());
            }
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
