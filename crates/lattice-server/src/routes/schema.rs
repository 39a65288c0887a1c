//! Schema catalog endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use lattice_error::Result;

use crate::auth::Principal;
use crate::state::AppContext;

use super::data;

/// Catalog routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/schema", get(fetch))
        .route("/schema/refresh", post(refresh))
}

/// The materialized catalog (fast-store cached).
async fn fetch(State(ctx): State<AppContext>, _principal: Principal) -> Result<impl IntoResponse> {
    Ok(data(ctx.catalog.get().await?))
}

/// Force a re-read of both stores' system catalogs.
async fn refresh(State(ctx): State<AppContext>, _principal: Principal) -> Result<impl IntoResponse> {
    tracing::info!("schema_catalog_refresh_requested");
    Ok(data(ctx.catalog.refresh().await?))
}
