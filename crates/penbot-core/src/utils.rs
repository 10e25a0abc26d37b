//! Utility helpers — path resolution, reply truncation, rate-limit reset times.

use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;

/// Marker appended to replies cut at the reply cap.
pub const TRUNCATION_MARKER: &str = "\n*[truncated]*";

/// Get the PenBot data directory (e.g. `~/.penbot/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".penbot")
}

/// Cut `text` to at most `cap` characters, appending [`TRUNCATION_MARKER`]
/// when anything was removed. Unicode-safe.
pub fn truncate_reply(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        None => text.to_string(),
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
    }
}

/// Parse an `X-RateLimit-Reset` header value (epoch milliseconds).
pub fn parse_reset_header(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Render a reset time as `YYYY-MM-DD HH:MM:SS UTC`.
pub fn format_reset_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
