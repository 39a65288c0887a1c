//! Router assembly and serving.

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};

use lattice_error::{CoreError, Result};

use crate::routes;
use crate::state::AppContext;

/// Build the application router with CORS and compression layers.
pub fn build_router(context: AppContext) -> Router {
    let cors = cors_layer(&context.config.cors_origins);

    routes::api_router()
        .layer(cors)
        .layer(CompressionLayer::new())
        .with_state(context)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Bind and serve until the process is terminated.
///
/// # Errors
///
/// Configuration errors for unbindable addresses, I/O errors from the
/// listener.
pub async fn serve(context: AppContext) -> Result<()> {
    let addr = context.config.bind_addr.clone();
    let router = build_router(context);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoreError::config(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, router).await.map_err(CoreError::from)
}
