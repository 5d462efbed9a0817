//! Utility functions for minilog

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Linearly growing backoff: attempt `n` waits `n * base`.
pub fn linear_backoff(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(attempt)
}

/// Current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Join a key prefix and a log key into a substrate key
pub fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}", prefix, key)
    }
}
