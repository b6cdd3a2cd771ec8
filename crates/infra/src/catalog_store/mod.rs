//! Catalog storage boundary used by the mutation engine.
//!
//! The engine never sees the storage schema: it reads price rows for a set of
//! ids, hands back a batch of writes that must land all-or-nothing, and asks for
//! each touched parent product to be invalidated and resynced.

pub mod in_memory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use varprice_catalog::{Variant, VariantPrices};
use varprice_core::{ProductId, VariantId};

pub use in_memory::InMemoryCatalogStore;

/// Current price fields of one editable variation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRow {
    pub variant_id: VariantId,
    pub parent_id: ProductId,
    pub prices: VariantPrices,
}

/// Full replacement of a variant's three price fields (upsert semantics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceWrite {
    pub variant_id: VariantId,
    pub prices: VariantPrices,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogStoreError {
    #[error("unknown variant: {0}")]
    UnknownVariant(VariantId),
    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),
    #[error("transaction aborted: {0}")]
    Transaction(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub trait CatalogStore: Send + Sync {
    /// Price rows for the ids that exist, are variations and have an editable
    /// status. Unknown or ineligible ids are silently absent from the result.
    fn load_price_targets(&self, ids: &[VariantId]) -> Result<Vec<PriceRow>, CatalogStoreError>;

    /// Apply every write or none of them.
    fn write_prices(&self, writes: &[PriceWrite]) -> Result<(), CatalogStoreError>;

    /// Invalidate cached data of a parent product and recompute its price range.
    fn resync_parent(&self, product_id: ProductId) -> Result<(), CatalogStoreError>;

    /// Every variant in the catalog (used for combination listings).
    fn list_variants(&self) -> Result<Vec<Variant>, CatalogStoreError>;
}

impl<S> CatalogStore for Arc<S>
where
    S: CatalogStore + ?Sized,
{
    fn load_price_targets(&self, ids: &[VariantId]) -> Result<Vec<PriceRow>, CatalogStoreError> {
        (**self).load_price_targets(ids)
    }

    fn write_prices(&self, writes: &[PriceWrite]) -> Result<(), CatalogStoreError> {
        (**self).write_prices(writes)
    }

    fn resync_parent(&self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        (**self).resync_parent(product_id)
    }

    fn list_variants(&self) -> Result<Vec<Variant>, CatalogStoreError> {
        (**self).list_variants()
    }
}
