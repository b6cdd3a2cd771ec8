//! Catalog domain module.
//!
//! Business rules for variant pricing, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage): the "does this variant need a
//! write" decision, how a price change is applied to a variant's three price
//! fields, and grouping variants by attribute combination.

pub mod combination;
pub mod variant;

pub use combination::{
    CombinationGroup, CombinationPage, CombinationQuery, combination_label, group_by_combination,
};
pub use variant::{ParentProduct, PriceRange, Variant, VariantKind, VariantPrices, VariantStatus};
