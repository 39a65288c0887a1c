//! Preview and workflow execution endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use lattice_core::cache::{CachePath, QueryRequest};
use lattice_core::graph::WorkflowGraph;
use lattice_error::{CoreError, Result};

use crate::auth::Principal;
use crate::state::AppContext;

use super::data;

/// Execution routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/executions", post(execute))
        .route("/executions/preview", post(preview))
        .route("/executions/{id}", get(status))
        .route("/executions/{id}/cancel", post(cancel))
}

/// Default preview page size.
const PREVIEW_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    target_node_id: String,
    graph:          Value,
    #[serde(default)]
    offset:         u64,
    #[serde(default = "default_preview_limit")]
    limit:          u64,
}

fn default_preview_limit() -> u64 {
    PREVIEW_LIMIT
}

/// Execute a constrained preview query for a single node of an inline
/// graph. Results are cached by content fingerprint.
async fn preview(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(body): Json<PreviewRequest>,
) -> Result<impl IntoResponse> {
    let graph = WorkflowGraph::parse(&body.graph)?;
    if graph.node(&body.target_node_id).is_none() {
        return Err(CoreError::validation_at(
            format!("target node '{}' is not in the graph", body.target_node_id),
            "target_node_id",
        ));
    }

    let request = QueryRequest {
        tenant_id: principal.tenant_id,
        target_node_id: body.target_node_id,
        graph,
        config_overrides: None,
        filter_params: None,
        offset: body.offset,
        limit: body.limit,
    };
    let response = ctx.cache.fetch(CachePath::Preview, &request).await?;
    Ok(data(response))
}

#[derive(Debug, Deserialize)]
struct ExecutionRequest {
    workflow_id: Uuid,
}

/// Compile and execute a stored workflow. Returns 202 immediately; status
/// streams over the per-execution channel and is readable via GET.
async fn execute(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(body): Json<ExecutionRequest>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .get(principal.tenant_id, body.workflow_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow"))?;
    let graph = WorkflowGraph::parse(&workflow.graph)?;

    let record = ctx
        .executions
        .start(principal.tenant_id, workflow.id, graph)
        .await?;
    tracing::info!(
        execution_id = %record.id,
        workflow_id = %workflow.id,
        tenant_id = %principal.tenant_id,
        user_id = %principal.user_id,
        "workflow_execution_accepted"
    );
    Ok((StatusCode::ACCEPTED, data(record)))
}

/// Current status of an execution.
async fn status(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let record = ctx
        .executions
        .store()
        .load(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Execution"))?;
    Ok(data(record))
}

/// Request cancellation. 409 when the execution already finished.
async fn cancel(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    ctx.executions.cancel(principal.tenant_id, id).await?;
    tracing::info!(execution_id = %id, tenant_id = %principal.tenant_id, "execution_cancel_requested");
    Ok((StatusCode::ACCEPTED, data(json!({"status": "cancelling"}))))
}
