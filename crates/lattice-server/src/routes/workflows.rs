//! Workflow CRUD, export/import, and version history.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use lattice_core::graph::WorkflowGraph;
use lattice_error::{CoreError, Result};

use crate::auth::Principal;
use crate::repo::NewWorkflow;
use crate::state::AppContext;

use super::data;

/// Workflow routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/workflows", get(list).post(create))
        .route("/workflows/import", post(import))
        .route("/workflows/{id}", get(fetch).put(update).delete(remove))
        .route("/workflows/{id}/export", get(export))
        .route("/workflows/{id}/versions", get(versions))
        .route("/workflows/{id}/versions/{version_id}/rollback", post(rollback))
}

#[derive(Debug, Deserialize)]
struct WorkflowPayload {
    name:        String,
    #[serde(default)]
    description: Option<String>,
    graph:       Value,
}

impl WorkflowPayload {
    /// Validate the graph on ingress, failing fast with the offending
    /// path, and produce the repo payload.
    fn into_new(self) -> Result<NewWorkflow> {
        WorkflowGraph::parse(&self.graph)?;
        Ok(NewWorkflow {
            name:        self.name,
            description: self.description,
            graph:       self.graph,
        })
    }
}

async fn list(State(ctx): State<AppContext>, principal: Principal) -> Result<impl IntoResponse> {
    Ok(data(ctx.workflow_repo.list(principal.tenant_id).await?))
}

async fn create(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(payload): Json<WorkflowPayload>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .create(principal.tenant_id, &payload.into_new()?)
        .await?;
    tracing::info!(
        workflow_id = %workflow.id,
        tenant_id = %principal.tenant_id,
        user_id = %principal.user_id,
        "workflow_created"
    );
    Ok((StatusCode::CREATED, data(workflow)))
}

async fn fetch(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow"))?;
    Ok(data(workflow))
}

async fn update(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkflowPayload>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .update(principal.tenant_id, id, &payload.into_new()?)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow"))?;
    tracing::info!(workflow_id = %id, tenant_id = %principal.tenant_id, "workflow_updated");
    Ok(data(workflow))
}

async fn remove(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !ctx.workflow_repo.delete(principal.tenant_id, id).await? {
        return Err(CoreError::not_found("Workflow"));
    }
    tracing::info!(workflow_id = %id, tenant_id = %principal.tenant_id, "workflow_deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Export: the portable workflow document (name, description, graph).
async fn export(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow"))?;
    Ok(data(json!({
        "name": workflow.name,
        "description": workflow.description,
        "graph": workflow.graph,
    })))
}

/// Import: create a new workflow from an exported document with freshly
/// assigned node ids (the topology is preserved, edges re-pointed).
async fn import(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(payload): Json<WorkflowPayload>,
) -> Result<impl IntoResponse> {
    let graph = WorkflowGraph::parse(&payload.graph)?;
    let remapped = graph.remap_ids();
    let new = NewWorkflow {
        name:        payload.name,
        description: payload.description,
        graph:       serde_json::to_value(&remapped)?,
    };
    let workflow = ctx.workflow_repo.create(principal.tenant_id, &new).await?;
    tracing::info!(
        workflow_id = %workflow.id,
        tenant_id = %principal.tenant_id,
        "workflow_imported"
    );
    Ok((StatusCode::CREATED, data(workflow)))
}

async fn versions(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    // Distinguish an unknown workflow from one with no history yet.
    ctx.workflow_repo
        .get(principal.tenant_id, id)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow"))?;
    Ok(data(ctx.workflow_repo.versions(principal.tenant_id, id).await?))
}

async fn rollback(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path((id, version_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let workflow = ctx
        .workflow_repo
        .rollback(principal.tenant_id, id, version_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Workflow version"))?;
    tracing::info!(
        workflow_id = %id,
        %version_id,
        tenant_id = %principal.tenant_id,
        "workflow_rolled_back"
    );
    Ok(data(workflow))
}
