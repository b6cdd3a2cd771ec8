//! Grouping of variants by identical attribute combination.
//!
//! This is what lets an operator pick "Size: M | Color: Red" once and reach every
//! matching variant across all products.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use varprice_core::{ProductId, VariantId};

use crate::variant::Variant;

/// Separator between `name: value` pairs in a combination label.
pub const LABEL_SEPARATOR: &str = " | ";

/// Filtering and paging for [`group_by_combination`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationQuery {
    /// Case-insensitive substring filter on the label.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: usize,
    pub per_page: usize,
}

impl Default for CombinationQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            per_page: 50,
        }
    }
}

/// All variants sharing one attribute combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationGroup {
    pub combination: String,
    pub variation_ids: Vec<VariantId>,
    /// Distinct parent products, in first-seen order.
    pub product_ids: Vec<ProductId>,
    /// Prices of the first variant seen in this group (display hint only).
    pub regular_price: Option<String>,
    pub sale_price: Option<String>,
    pub current_price: Option<String>,
    pub variation_count: usize,
    pub product_count: usize,
}

/// One page of combination groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationPage {
    pub items: Vec<CombinationGroup>,
    /// Number of groups matching the search, across all pages.
    pub total: usize,
    pub total_pages: usize,
    pub page: usize,
}

/// `"color: Red | size: M"`, attributes ordered by name, empty values skipped.
///
/// Returns `None` when the variant has no non-empty attribute.
pub fn combination_label(variant: &Variant) -> Option<String> {
    let parts: Vec<String> = variant
        .attributes
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{name}: {value}"))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(LABEL_SEPARATOR))
    }
}

/// Group editable variations by combination label, then filter, sort and paginate.
pub fn group_by_combination<'a>(
    variants: impl IntoIterator<Item = &'a Variant>,
    query: &CombinationQuery,
) -> CombinationPage {
    let mut groups: Vec<CombinationGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for variant in variants {
        if !variant.is_price_target() {
            continue;
        }
        let Some(label) = combination_label(variant) else {
            continue;
        };

        let slot = *index.entry(label.clone()).or_insert_with(|| {
            groups.push(CombinationGroup {
                combination: label,
                variation_ids: Vec::new(),
                product_ids: Vec::new(),
                regular_price: variant.prices.regular.clone(),
                sale_price: variant.prices.sale.clone(),
                current_price: variant.prices.price.clone(),
                variation_count: 0,
                product_count: 0,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.variation_ids.push(variant.id);
        if !group.product_ids.contains(&variant.parent_id) {
            group.product_ids.push(variant.parent_id);
        }
    }

    if let Some(needle) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let needle = needle.to_lowercase();
        groups.retain(|g| g.combination.to_lowercase().contains(&needle));
    }

    groups.sort_by(|a, b| a.combination.cmp(&b.combination));

    let per_page = query.per_page.max(1);
    let page = query.page.max(1);
    let total = groups.len();
    let total_pages = total.div_ceil(per_page);

    let items = groups
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|mut g| {
            g.variation_count = g.variation_ids.len();
            g.product_count = g.product_ids.len();
            g
        })
        .collect();

    CombinationPage {
        items,
        total,
        total_pages,
        page,
    }
}
