//! Errors raised by the pure primitives in this crate.
//!
//! Price validation has its own error type ([`crate::PriceError`]) because its
//! messages are shown to operators verbatim.

use thiserror::Error;

use crate::version::ExpectedVersion;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Text could not be parsed into an identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A version expectation did not hold.
    #[error("version conflict: expected {expected:?}, found {actual}")]
    VersionConflict {
        expected: ExpectedVersion,
        actual: u64,
    },
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
