// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Opaque session tokens.
//!
//! A token is 256 bits from the OS CSPRNG, hex encoded. It is only ever
//! compared for presence; nothing decodes it.

use rand::rngs::OsRng;
use rand::RngCore;

/// Default token size in bytes (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Generate a new session token.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
