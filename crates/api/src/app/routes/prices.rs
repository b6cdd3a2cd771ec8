use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Apply a price change inline and report the counts.
///
/// The catalog write is synchronous, so it runs on the blocking pool.
pub async fn update_prices(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PriceChangeRequest>,
) -> axum::response::Response {
    let applied = tokio::task::spawn_blocking(move || {
        services.controller.update_now(
            &body.variation_ids,
            &body.regular_price,
            body.sale_price.as_deref(),
        )
    })
    .await;

    match applied {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(dto::UpdatePricesResponse::from(outcome))).into_response(),
        Ok(Err(e)) => errors::start_job_error_to_response(e),
        Err(e) => {
            tracing::error!(error = %e, "inline price update task failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "price update did not finish",
            )
        }
    }
}
