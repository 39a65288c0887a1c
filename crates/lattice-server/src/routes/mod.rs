//! HTTP route modules.
//!
//! All JSON endpoints live under `/api/v1` and use the standard envelopes:
//! `{"data": …}` on success, `{"error": {code, message}}` on failure (the
//! latter comes from the error layer's `IntoResponse`).

pub mod api_keys;
pub mod dashboards;
pub mod embed;
pub mod executions;
pub mod health;
pub mod schema;
pub mod widgets;
pub mod workflows;
pub mod ws;

use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppContext;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    /// The payload.
    pub data: T,
}

/// Wrap a payload in the success envelope.
pub fn data<T: Serialize>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

/// Assemble the full API surface.
pub fn api_router() -> Router<AppContext> {
    let v1 = Router::new()
        .merge(workflows::router())
        .merge(executions::router())
        .merge(dashboards::router())
        .merge(widgets::router())
        .merge(embed::router())
        .merge(api_keys::router())
        .merge(schema::router())
        .merge(health::router())
        .merge(ws::router());

    Router::new().nest("/api/v1", v1)
}

/// Common pagination query parameters.
#[derive(Debug, serde::Deserialize)]
pub struct PageParams {
    /// Rows to skip.
    #[serde(default)]
    pub offset: u64,
    /// Rows to return.
    #[serde(default = "default_limit")]
    pub limit:  u64,
    /// Runtime filters as a JSON object string.
    #[serde(default)]
    pub filters: Option<String>,
}

fn default_limit() -> u64 {
    1_000
}
