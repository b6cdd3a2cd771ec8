use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use varprice_infra::jobs::{CancelJobError, JobStoreError, StartJobError};

pub fn start_job_error_to_response(err: StartJobError) -> axum::response::Response {
    match err {
        StartJobError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        StartJobError::Store(e) => store_error_to_response(e),
        StartJobError::Schedule(e) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "schedule_error",
            e.to_string(),
        ),
    }
}

pub fn cancel_job_error_to_response(err: CancelJobError) -> axum::response::Response {
    match err {
        CancelJobError::NotFound(id) => not_found(format!("job not found: {id}")),
        CancelJobError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::Contention(..) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()),
    }
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
