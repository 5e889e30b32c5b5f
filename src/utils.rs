// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Small formatting helpers shared by the core and the CLI.

/// Mask a sensitive string (like a session token) for logging.
///
/// Shows only the first `visible_prefix` characters followed by "...".
/// Values no longer than the prefix are hidden entirely.
///
/// # Examples
///
/// ```
/// use vitrine::utils::mask_sensitive;
///
/// let token = "3f9a1c0b7e2d45a8b6c1d0e9f8a7b6c5";
/// assert_eq!(mask_sensitive(token, 8), "3f9a1c0b...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        return "...".to_string();
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Render a second count as `1h 05m 03s`, `4m 10s` or `9s`.
pub fn format_duration_secs(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("0123456789abcdef", 8), "01234567...");
        assert_eq!(mask_sensitive("short", 8), "...");
        assert_eq!(mask_sensitive("", 8), "...");
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(0), "0s");
        assert_eq!(format_duration_secs(59), "59s");
        assert_eq!(format_duration_secs(250), "4m 10s");
        assert_eq!(format_duration_secs(3903), "1h 05m 03s");
    }
}
