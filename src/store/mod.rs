//! Key store abstraction and backends.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::{KeyRecord, RecordChange, RecordFilter};

/// Errors from key store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this key already exists.
    #[error("key already exists: {0}")]
    DuplicateKey(String),

    /// Transient backend failure (timeout, lost connection). The engine
    /// propagates this to the caller instead of guessing an outcome.
    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for key records.
///
/// Implementations must apply `update_if` and `update_matching` atomically
/// per record: the filter is evaluated and the change applied inside the
/// same per-key critical section, so two concurrent callers can never
/// interleave a read and a write on the same record.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Point lookup by key.
    async fn find(&self, key: &str) -> Result<Option<KeyRecord>, StoreError>;

    /// Insert a new record. Fails if the key already exists.
    async fn insert(&self, record: KeyRecord) -> Result<(), StoreError>;

    /// Conditionally apply `change` to the record for `key`.
    ///
    /// Returns the post-update record when the filter matched, `None` when
    /// the key is absent or the filter did not match.
    async fn update_if(
        &self,
        key: &str,
        filter: RecordFilter,
        change: RecordChange,
    ) -> Result<Option<KeyRecord>, StoreError>;

    /// Apply `change` to every record matching `filter`, atomically per
    /// record. Returns the number of records modified.
    async fn update_matching(
        &self,
        filter: RecordFilter,
        change: RecordChange,
    ) -> Result<u64, StoreError>;

    /// Snapshot of all records currently matching `filter`.
    async fn find_matching(&self, filter: RecordFilter) -> Result<Vec<KeyRecord>, StoreError>;
}
