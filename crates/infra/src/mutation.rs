//! Mutation engine: applies one price input to a set of variants.
//!
//! Reads current prices, skips variants that are invalid targets or already
//! correct, writes the rest in one all-or-nothing catalog write, and resyncs
//! every touched parent product. Failures never escape as errors; they are
//! reported in the [`MutationOutcome`].

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use varprice_core::{PriceInput, ProductId, VariantId};

use crate::catalog_store::{CatalogStore, PriceWrite};

/// Counts for one `apply` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationOutcome {
    pub requested: usize,
    pub updated: usize,
    pub skipped_same_price: usize,
    /// Requested ids that do not exist or are not editable variations.
    pub skipped_invalid: usize,
    /// Distinct parents of updated variants, ascending.
    pub affected_parents: Vec<ProductId>,
    pub resync_failures: usize,
    /// Set when the read or the write failed; nothing was written in that case.
    pub failure: Option<String>,
}

impl MutationOutcome {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct MutationEngine<C: CatalogStore> {
    catalog: C,
}

impl<C: CatalogStore> MutationEngine<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn apply(&self, ids: &[VariantId], input: &PriceInput) -> MutationOutcome {
        let mut outcome = MutationOutcome {
            requested: ids.len(),
            ..MutationOutcome::default()
        };

        if ids.is_empty() {
            return outcome;
        }

        let rows = match self.catalog.load_price_targets(ids) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to load price targets");
                outcome.failure = Some(e.to_string());
                return outcome;
            }
        };

        let valid: HashSet<VariantId> = rows.iter().map(|r| r.variant_id).collect();
        outcome.skipped_invalid = ids.iter().filter(|id| !valid.contains(id)).count();

        let mut writes = Vec::new();
        let mut parents = BTreeSet::new();
        for row in &rows {
            if row.prices.needs_update(input) {
                writes.push(PriceWrite {
                    variant_id: row.variant_id,
                    prices: row.prices.with_update(input),
                });
                parents.insert(row.parent_id);
            } else {
                outcome.skipped_same_price += 1;
            }
        }

        if writes.is_empty() {
            return outcome;
        }

        if let Err(e) = self.catalog.write_prices(&writes) {
            warn!(error = %e, writes = writes.len(), "price write rolled back");
            outcome.failure = Some(e.to_string());
            return outcome;
        }

        outcome.updated = writes.len();

        for parent in &parents {
            if let Err(e) = self.catalog.resync_parent(*parent) {
                warn!(product_id = %parent, error = %e, "parent resync failed");
                outcome.resync_failures += 1;
            }
        }
        outcome.affected_parents = parents.into_iter().collect();

        debug!(
            updated = outcome.updated,
            skipped_same_price = outcome.skipped_same_price,
            skipped_invalid = outcome.skipped_invalid,
            parents = outcome.affected_parents.len(),
            "prices applied"
        );

        outcome
    }
}
