//! Key records and the conditional-update vocabulary.
//!
//! Filters and changes are plain data rather than closures so that a store
//! backend can evaluate the predicate and apply the partial update inside
//! its own per-key critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::admission::window;

/// Persistent state for one issued API key.
///
/// Owned exclusively by the key registry; mutated only through the admission
/// engine and the blacklist reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Opaque unique identifier, immutable after creation.
    pub key: String,
    /// Identifies the key's owner; immutable.
    pub owner_id: String,
    /// Requests allowed per window.
    pub limit: u64,
    /// Start of the current fixed window. `None` counts as expired.
    pub window_start: Option<DateTime<Utc>>,
    /// Requests admitted in the current window.
    pub request_count: u64,
    /// Decaying tally of window-overflow events; the blacklist trigger.
    pub excessive_count: u64,
    /// Whether the key is serving a blacklist penalty.
    pub is_blacklisted: bool,
    /// Blacklist expiry; meaningful only while `is_blacklisted` is set.
    pub blacklisted_until: Option<DateTime<Utc>>,
    /// When the key was issued.
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// A freshly issued key record: empty window, no penalties.
    pub fn new(key: String, owner_id: String, limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            key,
            owner_id,
            limit,
            window_start: Some(now),
            request_count: 0,
            excessive_count: 0,
            is_blacklisted: false,
            blacklisted_until: None,
            created_at: now,
        }
    }

    /// True while the record carries a blacklist that has not yet expired.
    pub fn blacklist_active(&self, now: DateTime<Utc>) -> bool {
        self.is_blacklisted && self.blacklisted_until.map_or(false, |until| until > now)
    }

    /// True when marked blacklisted but the punitive window has elapsed (or
    /// was never set), i.e. the record is due for reconciliation.
    pub fn blacklist_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_blacklisted && self.blacklisted_until.map_or(true, |until| until <= now)
    }
}

/// Predicate a conditional update is gated on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordFilter {
    /// Marked blacklisted, regardless of expiry.
    Blacklisted,
    /// Not currently marked blacklisted.
    NotBlacklisted,
    /// Blacklist in force at `now`.
    BlacklistActive { now: DateTime<Utc> },
    /// Marked blacklisted with an elapsed (or missing) expiry.
    BlacklistExpired { now: DateTime<Utc> },
    /// The fixed window has lapsed or was never started.
    WindowExpired { now: DateTime<Utc>, window: Duration },
    /// Window still active and the request count is under the key's limit.
    UnderLimit { now: DateTime<Utc>, window: Duration },
    /// Window still active and the request count has reached the limit.
    OverLimit { now: DateTime<Utc>, window: Duration },
}

impl RecordFilter {
    /// Evaluate this predicate against a record.
    pub fn matches(&self, record: &KeyRecord) -> bool {
        match *self {
            RecordFilter::Blacklisted => record.is_blacklisted,
            RecordFilter::NotBlacklisted => !record.is_blacklisted,
            RecordFilter::BlacklistActive { now } => record.blacklist_active(now),
            RecordFilter::BlacklistExpired { now } => record.blacklist_expired(now),
            RecordFilter::WindowExpired { now, window } => {
                window::is_expired(record, now, window)
            }
            RecordFilter::UnderLimit { now, window } => {
                !window::is_expired(record, now, window) && record.request_count < record.limit
            }
            RecordFilter::OverLimit { now, window } => {
                !window::is_expired(record, now, window) && record.request_count >= record.limit
            }
        }
    }
}

/// Partial update applied atomically to one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordChange {
    /// Start a fresh window at `now`, counting the triggering request and
    /// forgiving one accumulated violation.
    ResetWindow { now: DateTime<Utc> },
    /// Count one admitted request in the active window.
    IncrementCount,
    /// Record one over-limit violation.
    IncrementExcessive,
    /// Impose a blacklist until the given instant.
    SetBlacklist { until: DateTime<Utc> },
    /// Lift the blacklist and zero the violation tally.
    ClearBlacklist,
}

impl RecordChange {
    /// Apply this partial update to a record.
    pub fn apply(&self, record: &mut KeyRecord) {
        match *self {
            RecordChange::ResetWindow { now } => {
                // The window start only ever moves forward.
                if record.window_start.map_or(true, |start| now > start) {
                    record.window_start = Some(now);
                }
                record.request_count = 1;
                record.excessive_count = record.excessive_count.saturating_sub(1);
            }
            RecordChange::IncrementCount => {
                record.request_count += 1;
            }
            RecordChange::IncrementExcessive => {
                record.excessive_count += 1;
            }
            RecordChange::SetBlacklist { until } => {
                record.is_blacklisted = true;
                record.blacklisted_until = Some(until);
            }
            RecordChange::ClearBlacklist => {
                record.is_blacklisted = false;
                record.blacklisted_until = None;
                record.excessive_count = 0;
            }
        }
    }
}
