//! Dashboard CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use lattice_error::{CoreError, Result};

use crate::auth::Principal;
use crate::repo::NewDashboard;
use crate::state::AppContext;

use super::data;

/// Dashboard routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/dashboards", get(list).post(create))
        .route("/dashboards/{id}", get(fetch).put(update).delete(remove))
        .route("/dashboards/{id}/widgets", get(list_widgets))
}

#[derive(Debug, Deserialize)]
struct DashboardPayload {
    name:   String,
    #[serde(default)]
    layout: Value,
}

impl DashboardPayload {
    fn into_new(self) -> NewDashboard {
        NewDashboard {
            name:   self.name,
            layout: if self.layout.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                self.layout
            },
        }
    }
}

async fn list(State(ctx): State<AppContext>, principal: Principal) -> Result<impl IntoResponse> {
    Ok(data(ctx.dashboard_repo.list(principal.tenant_id).await?))
}

async fn create(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(payload): Json<DashboardPayload>,
) -> Result<impl IntoResponse> {
    let dashboard = ctx
        .dashboard_repo
        .create(principal.tenant_id, &payload.into_new())
        .await?;
    tracing::info!(
        dashboard_id = %dashboard.id,
        tenant_id = %principal.tenant_id,
        "dashboard_created"
    );
    Ok((StatusCode::CREATED, data(dashboard)))
}

async fn fetch(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let dashboard = ctx
        .dashboard_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Dashboard"))?;
    Ok(data(dashboard))
}

async fn update(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<DashboardPayload>,
) -> Result<impl IntoResponse> {
    let dashboard = ctx
        .dashboard_repo
        .update(principal.tenant_id, id, &payload.into_new())
        .await?
        .ok_or_else(|| CoreError::not_found("Dashboard"))?;
    Ok(data(dashboard))
}

async fn remove(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !ctx.dashboard_repo.delete(principal.tenant_id, id).await? {
        return Err(CoreError::not_found("Dashboard"));
    }
    tracing::info!(dashboard_id = %id, tenant_id = %principal.tenant_id, "dashboard_deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_widgets(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ctx.dashboard_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Dashboard"))?;
    Ok(data(ctx.widget_repo.list_for_dashboard(principal.tenant_id, id).await?))
}
