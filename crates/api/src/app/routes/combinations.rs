use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};

use varprice_catalog::{CombinationQuery, group_by_combination};
use varprice_infra::CatalogStore;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Attribute combinations across the catalog, searchable and paginated.
pub async fn list_combinations(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::CombinationsQuery>,
) -> axum::response::Response {
    let variants = match services.catalog.list_variants() {
        Ok(v) => v,
        Err(e) => {
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "catalog_error", e.to_string());
        }
    };

    let defaults = CombinationQuery::default();
    let query = CombinationQuery {
        search: query.search,
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    };

    (StatusCode::OK, Json(group_by_combination(&variants, &query))).into_response()
}
