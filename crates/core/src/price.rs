//! Desired-price input and its validation.
//!
//! Prices travel as decimal strings end to end. Validation parses them only to
//! reject malformed, negative or inverted input; the accepted strings are kept
//! exactly as the operator typed them (after trimming), because downstream
//! "already correct" checks compare strings, not numbers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which price field an error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Regular,
    Sale,
}

impl core::fmt::Display for PriceField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PriceField::Regular => f.write_str("Regular price"),
            PriceField::Sale => f.write_str("Sale price"),
        }
    }
}

/// Input rejected before any job is created or any price is written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriceError {
    #[error("No variations selected.")]
    EmptyTargetSet,

    #[error("{field} must be a valid number.")]
    InvalidPriceFormat { field: PriceField },

    #[error("{field} cannot be negative.")]
    NegativePrice { field: PriceField },

    #[error("Sale price ({sale}) must be lower than the regular price ({regular}).")]
    SaleNotBelowRegular { sale: String, regular: String },
}

/// What to do with the sale (discounted) price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "value")]
pub enum SaleDirective {
    /// Leave the stored sale price untouched.
    Keep,
    /// Replace the sale price with this value.
    Set(String),
    /// Remove the sale price (explicit empty string from the caller).
    Clear,
}

impl SaleDirective {
    /// `None` → keep, `Some("")` → clear, `Some(v)` → set.
    pub fn from_input(sale: Option<&str>) -> Self {
        match sale.map(str::trim) {
            None => SaleDirective::Keep,
            Some("") => SaleDirective::Clear,
            Some(v) => SaleDirective::Set(v.to_string()),
        }
    }

    /// Inverse of [`SaleDirective::from_input`], used for persistence.
    pub fn as_input(&self) -> Option<&str> {
        match self {
            SaleDirective::Keep => None,
            SaleDirective::Set(v) => Some(v.as_str()),
            SaleDirective::Clear => Some(""),
        }
    }
}

/// A validated price change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInput {
    /// New regular price; empty means "leave unchanged".
    pub regular: String,
    pub sale: SaleDirective,
}

impl PriceInput {
    pub fn parse(regular: &str, sale: Option<&str>) -> Result<Self, PriceError> {
        let regular = regular.trim().to_string();
        let sale = SaleDirective::from_input(sale);

        let regular_value = if regular.is_empty() {
            None
        } else {
            Some(parse_amount(&regular, PriceField::Regular)?)
        };

        let sale_value = match &sale {
            SaleDirective::Set(v) => Some(parse_amount(v, PriceField::Sale)?),
            SaleDirective::Keep | SaleDirective::Clear => None,
        };

        if let (Some(r), Some(s)) = (regular_value, sale_value) {
            if s >= r {
                let sale_str = sale.as_input().unwrap_or_default().to_string();
                return Err(PriceError::SaleNotBelowRegular {
                    sale: sale_str,
                    regular,
                });
            }
        }

        Ok(Self { regular, sale })
    }

    /// True when applying this input can never change a stored price.
    pub fn is_noop(&self) -> bool {
        self.regular.is_empty() && self.sale == SaleDirective::Keep
    }
}

/// Reject an empty target selection.
pub fn validate_targets<T>(targets: &[T]) -> Result<(), PriceError> {
    if targets.is_empty() {
        Err(PriceError::EmptyTargetSet)
    } else {
        Ok(())
    }
}

/// Accepts `[+-]digits[.digits]` and `[+-].digits`.
fn parse_amount(raw: &str, field: PriceField) -> Result<f64, PriceError> {
    let unsigned = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    let well_formed = digits_ok(int_part)
        && frac_part.is_none_or(|f| !f.is_empty() && digits_ok(f))
        && !(int_part.is_empty() && frac_part.is_none());

    if !well_formed {
        return Err(PriceError::InvalidPriceFormat { field });
    }

    let value: f64 = raw
        .parse()
        .map_err(|_| PriceError::InvalidPriceFormat { field })?;

    if value < 0.0 {
        return Err(PriceError::NegativePrice { field });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_strings_verbatim() {
        let input = PriceInput::parse(" 10.00 ", Some("7.5")).unwrap();
        assert_eq!(input.regular, "10.00");
        assert_eq!(input.sale, SaleDirective::Set("7.5".to_string()));
    }

    #[test]
    fn empty_sale_means_clear_and_missing_means_keep() {
        assert_eq!(PriceInput::parse("10", Some("")).unwrap().sale, SaleDirective::Clear);
        assert_eq!(PriceInput::parse("10", None).unwrap().sale, SaleDirective::Keep);
    }

    #[test]
    fn rejects_malformed_numbers() {
        for bad in ["abc", "1.2.3", "12a", ".", "1.", "--1", "1,50"] {
            assert_eq!(
                PriceInput::parse(bad, None),
                Err(PriceError::InvalidPriceFormat {
                    field: PriceField::Regular
                }),
                "input {bad:?}"
            );
        }
        assert_eq!(
            PriceInput::parse("", Some("x")),
            Err(PriceError::InvalidPriceFormat {
                field: PriceField::Sale
            })
        );
    }

    #[test]
    fn rejects_negative_prices() {
        assert_eq!(
            PriceInput::parse("-1", None),
            Err(PriceError::NegativePrice {
                field: PriceField::Regular
            })
        );
        assert_eq!(
            PriceInput::parse("", Some("-0.5")),
            Err(PriceError::NegativePrice {
                field: PriceField::Sale
            })
        );
    }

    #[test]
    fn rejects_sale_not_below_regular() {
        assert!(matches!(
            PriceInput::parse("10", Some("10.00")),
            Err(PriceError::SaleNotBelowRegular { .. })
        ));
        assert!(PriceInput::parse("10", Some("9.99")).is_ok());
        // Only one side given: nothing to compare against.
        assert!(PriceInput::parse("", Some("99")).is_ok());
    }

    #[test]
    fn empty_target_set_is_rejected() {
        assert_eq!(validate_targets::<u64>(&[]), Err(PriceError::EmptyTargetSet));
        assert!(validate_targets(&[1u64]).is_ok());
    }

    #[test]
    fn noop_detection() {
        assert!(PriceInput::parse("", None).unwrap().is_noop());
        assert!(!PriceInput::parse("", Some("")).unwrap().is_noop());
    }
}
