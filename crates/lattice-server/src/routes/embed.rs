//! Embed endpoint: API-key-authenticated widget data for iframes.
//!
//! `GET /embed/{widget_id}?api_key=lk_…` — no session, no bearer token.
//! Tenant context comes from the API key row, never from the request.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use lattice_error::{AuthError, CoreError, Result};

use crate::auth::{check_api_key_format, hash_api_key};
use crate::state::AppContext;
use crate::widget_service::WidgetQuery;

use super::{data, widgets::parse_filters};

/// Embed routes.
pub fn router() -> Router<AppContext> {
    Router::new().route("/embed/{widget_id}", get(embed_data))
}

#[derive(Debug, Deserialize)]
struct EmbedParams {
    api_key: String,
    #[serde(default)]
    offset:  u64,
    #[serde(default = "default_embed_limit")]
    limit:   u64,
    #[serde(default)]
    filters: Option<String>,
}

fn default_embed_limit() -> u64 {
    10_000
}

async fn embed_data(
    State(ctx): State<AppContext>,
    Path(widget_id): Path<Uuid>,
    Query(params): Query<EmbedParams>,
) -> Result<impl IntoResponse> {
    // 1. Key format, then hash lookup.
    check_api_key_format(&params.api_key)?;
    let key_hash = hash_api_key(&params.api_key);
    let key = ctx
        .api_key_repo
        .find_by_hash(&key_hash)
        .await?
        .ok_or(CoreError::Auth(AuthError::InvalidApiKey))?;
    if key.is_revoked() {
        return Err(AuthError::RevokedApiKey.into());
    }

    // 2. Fixed-window rate limit, keyed by the hash. Fails open on bus
    //    errors inside the limiter.
    ctx.limiter
        .check(&key_hash, key.rate_limit.map(|l| l.unsigned_abs()))
        .await?;

    // 3. Widget scope check: a scoped key only reads its listed widgets.
    if let Some(scoped) = &key.scoped_widget_ids {
        if !scoped.contains(&widget_id) {
            return Err(AuthError::Forbidden {
                reason: "API key does not have access to this widget".to_string(),
            }
            .into());
        }
    }

    // 4. Widget data under the key's tenant; absent and cross-tenant
    //    widgets are both 404.
    let response = ctx
        .widgets
        .fetch_data(key.tenant_id, widget_id, WidgetQuery {
            offset:        params.offset,
            limit:         params.limit,
            filter_params: parse_filters(params.filters.as_deref())?,
        })
        .await?;
    Ok(data(response))
}
