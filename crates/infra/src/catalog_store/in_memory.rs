use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use varprice_catalog::{ParentProduct, PriceRange, Variant};
use varprice_core::{ProductId, VariantId};

use super::{CatalogStore, CatalogStoreError, PriceRow, PriceWrite};

#[derive(Debug, Default)]
struct CatalogState {
    variants: BTreeMap<VariantId, Variant>,
    products: BTreeMap<ProductId, ParentProduct>,
}

/// In-memory catalog for tests/dev.
///
/// Writes are applied under a single write lock, so a batch is atomic with
/// respect to readers. [`InMemoryCatalogStore::fail_next_writes`] injects
/// transaction failures.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    state: RwLock<CatalogState>,
    fail_next_writes: AtomicUsize,
    write_calls: AtomicU64,
}

fn poisoned() -> CatalogStoreError {
    CatalogStoreError::Storage("lock poisoned".to_string())
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a variant. The parent product is created on first use.
    pub fn insert_variant(&self, variant: Variant) {
        if let Ok(mut state) = self.state.write() {
            let parent = variant.parent_id;
            state
                .products
                .entry(parent)
                .or_insert_with(|| ParentProduct::new(parent, format!("Product {parent}")));
            state.variants.insert(variant.id, variant);
        }
    }

    pub fn insert_product(&self, product: ParentProduct) {
        if let Ok(mut state) = self.state.write() {
            state.products.insert(product.id, product);
        }
    }

    pub fn variant(&self, id: VariantId) -> Option<Variant> {
        self.state.read().ok()?.variants.get(&id).cloned()
    }

    pub fn product(&self, id: ProductId) -> Option<ParentProduct> {
        self.state.read().ok()?.products.get(&id).cloned()
    }

    /// Make the next `n` calls to `write_prices` fail without writing anything.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// Number of `write_prices` calls that reached the store (failed ones included).
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn load_price_targets(&self, ids: &[VariantId]) -> Result<Vec<PriceRow>, CatalogStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut seen = HashSet::new();

        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| state.variants.get(id))
            .filter(|v| v.is_price_target())
            .map(|v| PriceRow {
                variant_id: v.id,
                parent_id: v.parent_id,
                prices: v.prices.clone(),
            })
            .collect())
    }

    fn write_prices(&self, writes: &[PriceWrite]) -> Result<(), CatalogStoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_injected_failure() {
            return Err(CatalogStoreError::Transaction(
                "injected write failure".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;

        // Validate the whole batch before touching anything.
        if let Some(missing) = writes
            .iter()
            .find(|w| !state.variants.contains_key(&w.variant_id))
        {
            return Err(CatalogStoreError::UnknownVariant(missing.variant_id));
        }

        for write in writes {
            if let Some(variant) = state.variants.get_mut(&write.variant_id) {
                variant.prices = write.prices.clone();
            }
        }

        Ok(())
    }

    fn resync_parent(&self, product_id: ProductId) -> Result<(), CatalogStoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let range = PriceRange::from_prices(
            state
                .variants
                .values()
                .filter(|v| v.parent_id == product_id && v.is_price_target())
                .filter_map(|v| v.prices.price.as_deref()),
        );

        let product = state
            .products
            .get_mut(&product_id)
            .ok_or(CatalogStoreError::UnknownProduct(product_id))?;
        product.price_range = range;
        product.cache_generation += 1;

        Ok(())
    }

    fn list_variants(&self) -> Result<Vec<Variant>, CatalogStoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.variants.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varprice_catalog::{VariantPrices, VariantStatus};

    fn seeded() -> InMemoryCatalogStore {
        let store = InMemoryCatalogStore::new();
        store.insert_variant(Variant::new(VariantId(1), ProductId(10)).with_prices(Some("5"), None));
        store.insert_variant(Variant::new(VariantId(2), ProductId(10)).with_prices(Some("9"), Some("7")));
        store.insert_variant(
            Variant::new(VariantId(3), ProductId(10))
                .with_prices(Some("1"), None)
                .with_status(VariantStatus::Trash),
        );
        store
    }

    #[test]
    fn load_filters_ineligible_and_duplicate_ids() {
        let store = seeded();
        let rows = store
            .load_price_targets(&[VariantId(1), VariantId(3), VariantId(99), VariantId(1)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variant_id, VariantId(1));
    }

    #[test]
    fn batch_with_unknown_variant_writes_nothing() {
        let store = seeded();
        let writes = vec![
            PriceWrite {
                variant_id: VariantId(1),
                prices: VariantPrices::new(Some("6"), None),
            },
            PriceWrite {
                variant_id: VariantId(42),
                prices: VariantPrices::new(Some("6"), None),
            },
        ];

        assert_eq!(
            store.write_prices(&writes),
            Err(CatalogStoreError::UnknownVariant(VariantId(42)))
        );
        assert_eq!(store.variant(VariantId(1)).unwrap().prices.regular.as_deref(), Some("5"));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = seeded();
        store.fail_next_writes(1);
        assert!(store.write_prices(&[]).is_err());
        assert!(store.write_prices(&[]).is_ok());
        assert_eq!(store.write_calls(), 2);
    }

    #[test]
    fn resync_recomputes_price_range_from_editable_variants() {
        let store = seeded();
        store.resync_parent(ProductId(10)).unwrap();

        let product = store.product(ProductId(10)).unwrap();
        let range = product.price_range.unwrap();
        assert_eq!((range.min.as_str(), range.max.as_str()), ("5", "7"));
        assert_eq!(product.cache_generation, 1);

        assert_eq!(
            store.resync_parent(ProductId(77)),
            Err(CatalogStoreError::UnknownProduct(ProductId(77)))
        );
    }
}
