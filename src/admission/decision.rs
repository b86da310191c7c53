//! Admission outcomes reported to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use super::window;
use crate::registry::KeyRecord;

/// Outcome of a single admission check.
///
/// Throttling and blacklisting are expected control-flow outcomes, not
/// errors; each rejection variant carries machine-readable remaining-time
/// fields for the caller to report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// The request is within quota and has been counted.
    Admitted,
    /// No record exists for the presented key.
    InvalidKey,
    /// The key is serving a blacklist penalty.
    Blacklisted {
        until: DateTime<Utc>,
        remaining: Duration,
    },
    /// Over the per-window limit while the window is still open.
    RateLimited {
        limit: u64,
        count: u64,
        window_start: DateTime<Utc>,
        retry_after: Duration,
    },
    /// This violation crossed the blacklist threshold.
    NewlyBlacklisted { until: DateTime<Utc> },
}

/// Read-only view of a key's current state.
///
/// Computed from the raw record without mutating it, so a blacklist whose
/// expiry has passed but has not been reconciled yet reads as inactive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub key: String,
    pub owner_id: String,
    pub limit: u64,
    pub request_count: u64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_expired: bool,
    pub time_until_reset: Duration,
    pub excessive_count: u64,
    pub blacklisted: bool,
    pub blacklisted_until: Option<DateTime<Utc>>,
}

impl UsageSnapshot {
    pub(crate) fn new(record: &KeyRecord, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            key: record.key.clone(),
            owner_id: record.owner_id.clone(),
            limit: record.limit,
            request_count: record.request_count,
            window_start: record.window_start,
            window_expired: window::is_expired(record, now, window),
            time_until_reset: window::time_until_reset(record, now, window),
            excessive_count: record.excessive_count,
            blacklisted: record.blacklist_active(now),
            blacklisted_until: record.blacklisted_until,
        }
    }
}
