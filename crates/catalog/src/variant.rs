use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use varprice_core::{PriceInput, ProductId, SaleDirective, VariantId};

/// Catalog entity kind. Only variations are valid bulk-pricing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Variation,
    Simple,
}

/// Publication status of a catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    Publish,
    Private,
    Draft,
    Trash,
}

impl VariantStatus {
    /// Statuses whose prices may be edited in bulk.
    pub fn is_editable(&self) -> bool {
        matches!(self, VariantStatus::Publish | VariantStatus::Private)
    }
}

/// The three independently stored price fields of a variant.
///
/// `price` is the effective (charged) price and is derived: sale price when one
/// is set, otherwise the regular price. Missing fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPrices {
    pub regular: Option<String>,
    pub sale: Option<String>,
    pub price: Option<String>,
}

impl VariantPrices {
    pub fn new(regular: Option<&str>, sale: Option<&str>) -> Self {
        let mut prices = Self {
            regular: regular.map(str::to_string),
            sale: sale.map(str::to_string),
            price: None,
        };
        prices.price = prices.effective().map(str::to_string);
        prices
    }

    pub fn has_sale(&self) -> bool {
        self.sale.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Sale price if non-empty, else the regular price.
    pub fn effective(&self) -> Option<&str> {
        if self.has_sale() {
            self.sale.as_deref()
        } else {
            self.regular.as_deref().filter(|r| !r.is_empty())
        }
    }

    /// Whether applying `input` would change any stored field.
    ///
    /// Comparison is textual: "10" and "10.00" are different prices here.
    pub fn needs_update(&self, input: &PriceInput) -> bool {
        if !input.regular.is_empty() && self.regular.as_deref() != Some(input.regular.as_str()) {
            return true;
        }

        match &input.sale {
            SaleDirective::Keep => false,
            SaleDirective::Set(v) => self.sale.as_deref() != Some(v.as_str()),
            SaleDirective::Clear => self.has_sale(),
        }
    }

    /// The field values after applying `input`, with the effective price recomputed.
    pub fn with_update(&self, input: &PriceInput) -> VariantPrices {
        let regular = if input.regular.is_empty() {
            self.regular.clone()
        } else {
            Some(input.regular.clone())
        };

        let sale = match &input.sale {
            SaleDirective::Keep => self.sale.clone(),
            SaleDirective::Set(v) => Some(v.clone()),
            SaleDirective::Clear => None,
        };

        let mut next = VariantPrices {
            regular,
            sale,
            price: None,
        };
        next.price = next.effective().map(str::to_string);
        next
    }
}

/// One catalog variant: a concrete attribute combination of a parent product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub parent_id: ProductId,
    pub kind: VariantKind,
    pub status: VariantStatus,
    /// Attribute name → selected value (e.g. "size" → "M").
    pub attributes: BTreeMap<String, String>,
    pub prices: VariantPrices,
}

impl Variant {
    pub fn new(id: VariantId, parent_id: ProductId) -> Self {
        Self {
            id,
            parent_id,
            kind: VariantKind::Variation,
            status: VariantStatus::Publish,
            attributes: BTreeMap::new(),
            prices: VariantPrices::default(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_prices(mut self, regular: Option<&str>, sale: Option<&str>) -> Self {
        self.prices = VariantPrices::new(regular, sale);
        self
    }

    pub fn with_status(mut self, status: VariantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_kind(mut self, kind: VariantKind) -> Self {
        self.kind = kind;
        self
    }

    /// Valid target for bulk price edits (right kind, editable status).
    pub fn is_price_target(&self) -> bool {
        self.kind == VariantKind::Variation && self.status.is_editable()
    }
}

/// Min/max effective price over a product's variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: String,
    pub max: String,
}

impl PriceRange {
    /// Numeric min/max over the given prices; unparseable entries are ignored.
    pub fn from_prices<'a>(prices: impl IntoIterator<Item = &'a str>) -> Option<PriceRange> {
        let mut min: Option<(f64, &str)> = None;
        let mut max: Option<(f64, &str)> = None;

        for p in prices {
            let Ok(v) = p.parse::<f64>() else { continue };
            if !v.is_finite() {
                continue;
            }
            if min.is_none_or(|(m, _)| v < m) {
                min = Some((v, p));
            }
            if max.is_none_or(|(m, _)| v > m) {
                max = Some((v, p));
            }
        }

        match (min, max) {
            (Some((_, lo)), Some((_, hi))) => Some(PriceRange {
                min: lo.to_string(),
                max: hi.to_string(),
            }),
            _ => None,
        }
    }
}

/// Parent product with its cached, derived price range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentProduct {
    pub id: ProductId,
    pub name: String,
    pub price_range: Option<PriceRange>,
    /// Bumped every time the product's caches are invalidated.
    pub cache_generation: u64,
}

impl ParentProduct {
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            price_range: None,
            cache_generation: 0,
        }
    }
}
