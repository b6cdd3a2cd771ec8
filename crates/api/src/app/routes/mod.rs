use axum::{
    Router,
    routing::{get, post},
};

pub mod combinations;
pub mod jobs;
pub mod prices;
pub mod system;

/// Router for all price-management endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .route("/prices", post(prices::update_prices))
        .route("/combinations", get(combinations::list_combinations))
}
