//! Blacklist expiry reconciliation.
//!
//! One primitive, three callers: the lazy inline check before every
//! admission decision, the periodic bulk sweep, and the administrative
//! release override. All three apply the same `ClearBlacklist` change and
//! converge to identical record state.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::registry::{KeyRecord, RecordChange, RecordFilter};
use crate::store::{KeyStore, StoreError};

/// Lazily reconcile one record: if its blacklist has expired, clear it and
/// zero the violation tally. Returns whether the record is still blacklisted
/// together with its current state. Idempotent.
pub async fn reconcile<S: KeyStore + ?Sized>(
    store: &S,
    record: KeyRecord,
    now: DateTime<Utc>,
) -> Result<(bool, KeyRecord), StoreError> {
    if !record.is_blacklisted {
        return Ok((false, record));
    }
    if record.blacklist_active(now) {
        return Ok((true, record));
    }

    debug!(key = %record.key, "clearing expired blacklist");
    match store
        .update_if(
            &record.key,
            RecordFilter::BlacklistExpired { now },
            RecordChange::ClearBlacklist,
        )
        .await?
    {
        Some(updated) => Ok((false, updated)),
        // Another caller reconciled the record first; report its live state.
        None => {
            let current = store.find(&record.key).await?.unwrap_or(record);
            let still = current.blacklist_active(now);
            Ok((still, current))
        }
    }
}

/// Eagerly clear every blacklist whose expiry has passed. Returns the number
/// of records reconciled.
pub async fn sweep_expired<S: KeyStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let cleared = store
        .update_matching(
            RecordFilter::BlacklistExpired { now },
            RecordChange::ClearBlacklist,
        )
        .await?;
    if cleared > 0 {
        info!(cleared, "cleared expired blacklists");
    }
    Ok(cleared)
}

/// Administrative override: lift the blacklist now, expiry notwithstanding.
/// Returns whether the key was blacklisted.
pub async fn release<S: KeyStore + ?Sized>(store: &S, key: &str) -> Result<bool, StoreError> {
    let released = store
        .update_if(key, RecordFilter::Blacklisted, RecordChange::ClearBlacklist)
        .await?
        .is_some();
    if released {
        info!(key, "blacklist lifted by administrative override");
    }
    Ok(released)
}
