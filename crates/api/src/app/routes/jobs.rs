use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use varprice_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_active_jobs).post(start_job))
        .route("/processing-ids", get(processing_ids))
        .route("/:job_id", get(get_job).delete(cancel_job))
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}

pub async fn start_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PriceChangeRequest>,
) -> axum::response::Response {
    match services.controller.start_job(
        body.variation_ids,
        body.product_ids,
        &body.regular_price,
        body.sale_price.as_deref(),
    ) {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(dto::StartJobResponse { job_id }),
        )
            .into_response(),
        Err(e) => errors::start_job_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.controller.get_job_status(&job_id) {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => errors::not_found(format!("job not found: {job_id}")),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.controller.cancel_job(&job_id) {
        Ok(()) => (StatusCode::OK, Json(dto::CancelJobResponse { cancelled: true })).into_response(),
        Err(e) => errors::cancel_job_error_to_response(e),
    }
}

pub async fn list_active_jobs(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.controller.get_active_jobs() {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn processing_ids(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.controller.get_processing_variation_ids() {
        Ok(ids) => (StatusCode::OK, Json(ids)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
