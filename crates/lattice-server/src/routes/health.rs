//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppContext;

/// Health routes.
pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status:  &'static str,
    version: &'static str,
}

/// Basic health: the process is up and serving.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status:  "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness: always 200 while the event loop runs.
async fn live() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct DependencyStatus {
    fast_store: bool,
    analytical: bool,
    live_store: bool,
    relational: bool,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status:       &'static str,
    dependencies: DependencyStatus,
}

/// Readiness: probes every backing dependency; 503 when any is down.
async fn ready(State(ctx): State<AppContext>) -> impl IntoResponse {
    let fast_store = ctx.fast.ping().await.is_ok();
    let analytical = ctx.analytical.ping().await.is_ok();
    let live_store = ctx.live.ping().await.is_ok();
    let relational = ctx.workflow_repo.list(uuid::Uuid::nil()).await.is_ok();

    let dependencies = DependencyStatus {
        fast_store,
        analytical,
        live_store,
        relational,
    };
    let all_up = fast_store && analytical && live_store && relational;

    if !all_up {
        tracing::error!(?dependencies, "readiness probe failed");
    }

    let status_code = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        Json(ReadyResponse {
            status: if all_up { "ready" } else { "degraded" },
            dependencies,
        }),
    )
}
