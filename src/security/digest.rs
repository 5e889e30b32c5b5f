// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Salted credential digests.
//!
//! The operator credential is held only as `SHA-256(value || salt)` for both
//! the identifier and the secret. Submitted values are digested the same way
//! and compared with [`subtle::ConstantTimeEq`]. Both digests are always 32
//! bytes, so neither the comparison time nor an early length check reveals
//! anything about the configured values.

use sha2::{Digest, Sha256};
use std::fmt;
use subtle::{Choice, ConstantTimeEq};

/// SHA-256 output size.
pub const DIGEST_LEN: usize = 32;

/// `SHA-256(value || salt)`.
pub fn salted_digest(value: &str, salt: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.finalize().into()
}

/// Hex form of [`salted_digest`], for diagnostics and fixtures.
pub fn salted_digest_hex(value: &str, salt: &str) -> String {
    hex::encode(salted_digest(value, salt))
}

/// The configured operator credential, reduced to salted digests.
#[derive(Clone)]
pub struct Credential {
    identifier_digest: [u8; DIGEST_LEN],
    secret_digest: [u8; DIGEST_LEN],
    salt: String,
}

impl Credential {
    pub fn new(identifier: &str, secret: &str, salt: impl Into<String>) -> Self {
        let salt = salt.into();
        Self {
            identifier_digest: salted_digest(identifier, &salt),
            secret_digest: salted_digest(secret, &salt),
            salt,
        }
    }

    /// Check a submitted pair. Both halves are always evaluated.
    pub fn matches(&self, identifier: &str, secret: &str) -> bool {
        let id_ok: Choice = salted_digest(identifier, &self.salt)[..].ct_eq(&self.identifier_digest[..]);
        let secret_ok: Choice = salted_digest(secret, &self.salt)[..].ct_eq(&self.secret_digest[..]);
        (id_ok & secret_ok).into()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier_digest", &"<redacted>")
            .field("secret_digest", &"<redacted>")
            .finish()
    }
}
