use serde::{Deserialize, Serialize};

use varprice_core::{JobId, ProductId, VariantId};
use varprice_infra::MutationOutcome;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /jobs` and `POST /prices`.
///
/// `sale_price` absent keeps the sale price, `""` clears it.
#[derive(Debug, Deserialize)]
pub struct PriceChangeRequest {
    pub variation_ids: Vec<VariantId>,
    #[serde(default)]
    pub product_ids: Vec<ProductId>,
    #[serde(default)]
    pub regular_price: String,
    #[serde(default)]
    pub sale_price: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CombinationsQuery {
    pub search: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub cancelled: bool,
}

/// Result of an inline (`POST /prices`) update.
#[derive(Debug, Serialize)]
pub struct UpdatePricesResponse {
    pub success: bool,
    pub updated: usize,
    pub skipped_same_price: usize,
    pub skipped_invalid: usize,
    pub synced_products: usize,
    pub error: Option<String>,
}

impl From<MutationOutcome> for UpdatePricesResponse {
    fn from(outcome: MutationOutcome) -> Self {
        Self {
            success: outcome.failure.is_none(),
            updated: outcome.updated,
            skipped_same_price: outcome.skipped_same_price,
            skipped_invalid: outcome.skipped_invalid,
            synced_products: outcome.affected_parents.len(),
            error: outcome.failure,
        }
    }
}
