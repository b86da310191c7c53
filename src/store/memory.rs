//! In-memory key store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{KeyStore, StoreError};
use crate::registry::{KeyRecord, RecordChange, RecordFilter};

/// In-memory `KeyStore` backed by a sharded concurrent map.
///
/// `DashMap` entry access gives each record its own exclusive critical
/// section, which is what makes `update_if` an atomic conditional update.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, KeyRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn find(&self, key: &str) -> Result<Option<KeyRecord>, StoreError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, record: KeyRecord) -> Result<(), StoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(record.key)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update_if(
        &self,
        key: &str,
        filter: RecordFilter,
        change: RecordChange,
    ) -> Result<Option<KeyRecord>, StoreError> {
        match self.records.get_mut(key) {
            None => Ok(None),
            Some(mut entry) => {
                let record = entry.value_mut();
                if filter.matches(record) {
                    change.apply(record);
                    Ok(Some(record.clone()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn update_matching(
        &self,
        filter: RecordFilter,
        change: RecordChange,
    ) -> Result<u64, StoreError> {
        let mut modified = 0;
        for mut entry in self.records.iter_mut() {
            let record = entry.value_mut();
            if filter.matches(record) {
                change.apply(record);
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn find_matching(&self, filter: RecordFilter) -> Result<Vec<KeyRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
