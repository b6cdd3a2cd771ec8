//! `varprice-core`: shared building blocks.
//!
//! Pure primitives only (no IO): identifiers, version expectations for
//! optimistic concurrency, the domain error model and price input validation.

pub mod error;
pub mod id;
pub mod price;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, ProductId, VariantId};
pub use price::{PriceError, PriceField, PriceInput, SaleDirective, validate_targets};
pub use version::ExpectedVersion;
