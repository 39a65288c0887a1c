//! API key management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lattice_error::{CoreError, Result};

use crate::auth::{hash_api_key, mint_api_key, Principal};
use crate::repo::{ApiKey, NewApiKey};
use crate::state::AppContext;

use super::data;

/// API key routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/api-keys", get(list).post(create))
        .route("/api-keys/{id}", axum::routing::delete(revoke))
}

async fn list(State(ctx): State<AppContext>, principal: Principal) -> Result<impl IntoResponse> {
    Ok(data(ctx.api_key_repo.list(principal.tenant_id).await?))
}

#[derive(Debug, Deserialize)]
struct ApiKeyPayload {
    name:              String,
    #[serde(default)]
    scoped_widget_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    rate_limit:        Option<i64>,
}

/// Create response: the only place the raw key ever appears.
#[derive(Debug, Serialize)]
struct CreatedApiKey {
    /// The raw key. Shown exactly once; store it now.
    key:     String,
    /// The stored key metadata.
    api_key: ApiKey,
}

async fn create(
    State(ctx): State<AppContext>,
    principal: Principal,
    Json(payload): Json<ApiKeyPayload>,
) -> Result<impl IntoResponse> {
    let raw = mint_api_key();
    let api_key = ctx
        .api_key_repo
        .create(principal.tenant_id, &hash_api_key(&raw), &NewApiKey {
            name:              payload.name,
            scoped_widget_ids: payload.scoped_widget_ids,
            rate_limit:        payload.rate_limit,
        })
        .await?;
    tracing::info!(
        api_key_id = %api_key.id,
        tenant_id = %principal.tenant_id,
        "api_key_created"
    );
    Ok((StatusCode::CREATED, data(CreatedApiKey { key: raw, api_key })))
}

async fn revoke(
    State(ctx): State<AppContext>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    if !ctx.api_key_repo.revoke(principal.tenant_id, id).await? {
        return Err(CoreError::not_found("API key"));
    }
    tracing::info!(api_key_id = %id, tenant_id = %principal.tenant_id, "api_key_revoked");
    Ok(StatusCode::NO_CONTENT)
}
