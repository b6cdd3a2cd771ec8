use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use varprice_core::ExpectedVersion;

use super::{RecordStore, RecordStoreError, VersionedRecord};

/// In-memory record store.
///
/// Intended for tests/dev. Keys are kept ordered so prefix scans are range reads.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<String, VersionedRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> RecordStoreError {
    RecordStoreError::Storage("lock poisoned".to_string())
}

impl RecordStore for InMemoryRecordStore {
    fn get(&self, key: &str) -> Result<Option<VersionedRecord>, RecordStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, RecordStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;

        let current = records.get(key).map(|r| r.version).unwrap_or(0);
        expected
            .check(current)
            .map_err(|_| RecordStoreError::Concurrency {
                key: key.to_string(),
                expected,
                actual: current,
            })?;

        let version = current + 1;
        records.insert(key.to_string(), VersionedRecord { value, version });
        Ok(version)
    }

    fn delete(&self, key: &str) -> Result<bool, RecordStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(key).is_some())
    }

    fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, RecordStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
