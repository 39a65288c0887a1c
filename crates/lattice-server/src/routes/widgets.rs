//! Widget CRUD and the authenticated widget-data endpoint.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use lattice_error::{CoreError, Result};

use crate::auth::Principal;
use crate::repo::NewWidget;
use crate::state::AppContext;
use crate::widget_service::WidgetQuery;

use super::{data, PageParams};

/// Widget routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/widgets", axum::routing::post(create))
        .route("/widgets/{id}", get(fetch).put(update).delete(remove))
        .route("/widgets/{id}/data", get(widget_data))
}

#[derive(Debug, Deserialize)]
struct WidgetPayload {
    dashboard_id:          Uuid,
    source_workflow_id:    Uuid,
    source_node_id:        String,
    #[serde(default)]
    title:                 Option<String>,
    #[serde(default)]
    layout:                Value,
    #[serde(default)]
    config_overrides:      Value,
    #[serde(default)]
    auto_refresh_interval: Option<i32>,
}

impl WidgetPayload {
    fn into_new(self) -> NewWidget {
        NewWidget {
            dashboard_id:          self.dashboard_id,
            source_workflow_id:    self.source_workflow_id,
            source_node_id:        self.source_node_id,
            title:                 self.title,
            layout:                object_or_empty(self.layout),
            config_overrides:      object_or_empty(self.config_overrides),
            auto_refresh_interval: self.auto_refresh_interval,
        }
    }
}

fn object_or_empty(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        Value::Object(Map::new())
    }
}

/// Create a widget pin. The dashboard and the referenced workflow must
/// both belong to the caller's tenant; a cross-tenant workflow reads as
/// absent.
async fn create(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(payload): Json<WidgetPayload>,
) -> Result<impl IntoResponse> {
    ctx.dashboard_repo
        .get(principal.tenant_id, payload.dashboard_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Dashboard"))?;
    ctx.workflow_repo
        .get(principal.tenant_id, payload.source_workflow_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Source workflow"))?;

    let widget = ctx.widget_repo.create(&payload.into_new()).await?;
    tracing::info!(widget_id = %widget.id, tenant_id = %principal.tenant_id, "widget_created");
    Ok((StatusCode::CREATED, data(widget)))
}

async fn fetch(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let widget = ctx
        .widget_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Widget"))?;
    Ok(data(widget))
}

async fn update(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<WidgetPayload>,
) -> Result<impl IntoResponse> {
    let widget = ctx
        .widget_repo
        .update(principal.tenant_id, id, &payload.into_new())
        .await?
        .ok_or_else(|| CoreError::not_found("Widget"))?;
    Ok(data(widget))
}

async fn remove(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !ctx.widget_repo.delete(principal.tenant_id, id).await? {
        return Err(CoreError::not_found("Widget"));
    }
    tracing::info!(widget_id = %id, tenant_id = %principal.tenant_id, "widget_deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Widget data for the authenticated dashboard path.
async fn widget_data(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let response = ctx
        .widgets
        .fetch_data(principal.tenant_id, id, WidgetQuery {
            offset:        page.offset,
            limit:         page.limit,
            filter_params: parse_filters(page.filters.as_deref())?,
        })
        .await?;
    Ok(data(response))
}

/// Parse the `filters` query parameter: a JSON object of column → value.
pub(super) fn parse_filters(raw: Option<&str>) -> Result<Option<Map<String, Value>>> {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| CoreError::validation_at(format!("invalid filters JSON: {e}"), "filters"))?;
    match parsed {
        Value::Object(object) => Ok(Some(object)),
        _ => Err(CoreError::validation_at(
            "filters must be a JSON object",
            "filters",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters_accepts_object() {
        let filters = parse_filters(Some("{\"symbol\":\"AAPL\"}"))
            .expect("parses")
            .expect("present");
        assert_eq!(filters.get("symbol"), Some(&Value::String("AAPL".to_string())));
    }

    #[test]
    fn test_parse_filters_rejects_non_object() {
        assert!(parse_filters(Some("[1,2]")).is_err());
        assert!(parse_filters(Some("not json")).is_err());
    }

    #[test]
    fn test_parse_filters_empty_is_none() {
        assert!(parse_filters(None).expect("ok").is_none());
        assert!(parse_filters(Some("")).expect("ok").is_none());
    }
}
