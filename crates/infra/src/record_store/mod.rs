//! Named-record persistence boundary.
//!
//! The job registry only needs get/set/delete on named JSON records plus a prefix
//! scan. Every record carries a version stamp so callers can do optimistic
//! read-modify-write cycles with [`ExpectedVersion`].

pub mod in_memory;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use varprice_core::ExpectedVersion;

pub use in_memory::InMemoryRecordStore;

/// A stored record together with its version stamp (>= 1).
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRecord {
    pub value: JsonValue,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordStoreError {
    /// Version stamp did not match the expectation (lost race with another writer).
    #[error("concurrency conflict on '{key}': expected {expected:?}, found version {actual}")]
    Concurrency {
        key: String,
        expected: ExpectedVersion,
        actual: u64,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Key → JSON record storage.
pub trait RecordStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<VersionedRecord>, RecordStoreError>;

    /// Write `value` under `key` if the current version matches `expected`.
    ///
    /// Returns the new version.
    fn set(
        &self,
        key: &str,
        value: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, RecordStoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, key: &str) -> Result<bool, RecordStoreError>;

    /// Keys starting with `prefix`, in ascending order.
    fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, RecordStoreError>;
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<VersionedRecord>, RecordStoreError> {
        (**self).get(key)
    }

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, RecordStoreError> {
        (**self).set(key, value, expected)
    }

    fn delete(&self, key: &str) -> Result<bool, RecordStoreError> {
        (**self).delete(key)
    }

    fn list_keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, RecordStoreError> {
        (**self).list_keys_by_prefix(prefix)
    }
}
