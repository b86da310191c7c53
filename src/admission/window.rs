//! Fixed-window expiry tracking.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::registry::KeyRecord;

/// A window is expired when it was never started or has been open for at
/// least the full window duration.
pub fn is_expired(record: &KeyRecord, now: DateTime<Utc>, window: Duration) -> bool {
    match record.window_start {
        None => true,
        Some(start) => match now.signed_duration_since(start).to_std() {
            Ok(elapsed) => elapsed >= window,
            // Start in the future: resets only move forward, so a clock
            // went backwards. Treat the window as still active.
            Err(_) => false,
        },
    }
}

/// Time remaining until the current window lapses. Zero when already expired.
pub fn time_until_reset(record: &KeyRecord, now: DateTime<Utc>, window: Duration) -> Duration {
    match record.window_start {
        None => Duration::ZERO,
        Some(start) => {
            let elapsed = now
                .signed_duration_since(start)
                .to_std()
                .unwrap_or(Duration::ZERO);
            window.saturating_sub(elapsed)
        }
    }
}
