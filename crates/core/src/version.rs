//! Optimistic concurrency expectations for versioned records.

use crate::error::{DomainError, DomainResult};

/// Version expectation attached to a write.
///
/// Record versions start at 1 for the first write and increase by one on every
/// subsequent write. A missing record has version 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (blind overwrite).
    Any,
    /// The record must not exist yet.
    Absent,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Absent => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::VersionConflict {
                expected: self,
                actual,
            })
        }
    }
}
