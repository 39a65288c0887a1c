//! Relational repositories.
//!
//! Workflows (with versions), dashboards, widgets, and API keys persist in
//! the relational store. Every top-level table carries a NOT NULL, indexed
//! `tenant_id`; widgets inherit tenant scope through their dashboard. Every
//! query here carries the tenant predicate, so an absent row and a
//! cross-tenant row are indistinguishable — both read as `None` and surface
//! as 404 at the route layer.

mod api_keys;
mod dashboards;
mod workflows;

pub use api_keys::{ApiKey, ApiKeyRepo, NewApiKey};
pub use dashboards::{Dashboard, DashboardRepo, NewDashboard, NewWidget, Widget, WidgetRepo};
pub use workflows::{NewWorkflow, Workflow, WorkflowRepo, WorkflowVersion};

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use lattice_error::{CoreError, Result};

/// Build the relational pool from a connection URL. Connections are
/// established lazily on first use.
///
/// # Errors
///
/// `CoreError::Configuration` for unparseable URLs.
pub fn build_pool(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy(url)
        .map_err(|e| CoreError::config(format!("invalid relational store URL: {e}")))
}

/// Map a statement failure.
pub(crate) fn db_error(e: sqlx::Error) -> CoreError {
    CoreError::internal(format!("relational store error: {e}"))
}
