//! Dashboard and widget persistence.
//!
//! Widgets never own a query: they point at a workflow's output node and
//! overlay config. Tenant scope reaches widgets through their dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use lattice_error::Result;

use super::db_error;

/// A stored dashboard.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Dashboard {
    /// Dashboard id.
    pub id:         Uuid,
    /// Owning tenant.
    pub tenant_id:  Uuid,
    /// Display name.
    pub name:       String,
    /// Frontend-owned layout blob.
    pub layout:     Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Dashboard create/update payload.
#[derive(Debug, Clone)]
pub struct NewDashboard {
    /// Display name.
    pub name:   String,
    /// Layout blob.
    pub layout: Value,
}

/// A widget pin: a named pointer at a workflow output node.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Widget {
    /// Widget id.
    pub id:                    Uuid,
    /// Dashboard the widget is pinned to.
    pub dashboard_id:          Uuid,
    /// The workflow whose output the widget renders.
    pub source_workflow_id:    Uuid,
    /// The output node within that workflow.
    pub source_node_id:        String,
    /// Display title.
    pub title:                 Option<String>,
    /// Frontend-owned layout blob.
    pub layout:                Value,
    /// Config overlaid onto the source node at query time.
    pub config_overrides:      Value,
    /// Refresh interval in seconds; `-1` means live mode (server push).
    pub auto_refresh_interval: Option<i32>,
    /// Creation timestamp.
    pub created_at:            DateTime<Utc>,
}

impl Widget {
    /// Whether this widget is in live mode (server-pushed updates).
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.auto_refresh_interval == Some(-1)
    }
}

/// Widget create/update payload.
#[derive(Debug, Clone)]
pub struct NewWidget {
    /// Dashboard to pin to.
    pub dashboard_id:          Uuid,
    /// Source workflow.
    pub source_workflow_id:    Uuid,
    /// Source output node.
    pub source_node_id:        String,
    /// Display title.
    pub title:                 Option<String>,
    /// Layout blob.
    pub layout:                Value,
    /// Config overrides.
    pub config_overrides:      Value,
    /// Refresh interval; `-1` for live mode.
    pub auto_refresh_interval: Option<i32>,
}

/// Dashboard repository.
#[derive(Clone)]
pub struct DashboardRepo {
    pool: PgPool,
}

const DASHBOARD_COLUMNS: &str = "id, tenant_id, name, layout, created_at, updated_at";

impl DashboardRepo {
    /// Create a repository over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List a tenant's dashboards.
    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<Dashboard>> {
        sqlx::query_as(&format!(
            "SELECT {DASHBOARD_COLUMNS} FROM dashboards \
             WHERE tenant_id = $1 ORDER BY updated_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Fetch one dashboard.
    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Dashboard>> {
        sqlx::query_as(&format!(
            "SELECT {DASHBOARD_COLUMNS} FROM dashboards WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Create a dashboard.
    pub async fn create(&self, tenant_id: Uuid, new: &NewDashboard) -> Result<Dashboard> {
        sqlx::query_as(&format!(
            "INSERT INTO dashboards (id, tenant_id, name, layout, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, now(), now()) \
             RETURNING {DASHBOARD_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&new.name)
        .bind(&new.layout)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Update a dashboard.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        new: &NewDashboard,
    ) -> Result<Option<Dashboard>> {
        sqlx::query_as(&format!(
            "UPDATE dashboards SET name = $3, layout = $4, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2 \
             RETURNING {DASHBOARD_COLUMNS}"
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(&new.name)
        .bind(&new.layout)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Delete a dashboard (widgets cascade in the schema).
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM dashboards WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(deleted.rows_affected() > 0)
    }
}

/// Widget repository.
#[derive(Clone)]
pub struct WidgetRepo {
    pool: PgPool,
}

const WIDGET_SELECT: &str =
    "SELECT w.id, w.dashboard_id, w.source_workflow_id, w.source_node_id, w.title, \
     w.layout, w.config_overrides, w.auto_refresh_interval, w.created_at \
     FROM widgets w JOIN dashboards d ON d.id = w.dashboard_id";

impl WidgetRepo {
    /// Create a repository over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List the widgets of one dashboard (tenant-scoped via the join).
    pub async fn list_for_dashboard(&self, tenant_id: Uuid, dashboard_id: Uuid) -> Result<Vec<Widget>> {
        sqlx::query_as(&format!(
            "{WIDGET_SELECT} WHERE d.tenant_id = $1 AND w.dashboard_id = $2 \
             ORDER BY w.created_at"
        ))
        .bind(tenant_id)
        .bind(dashboard_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Fetch one widget (tenant-scoped via the join).
    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Widget>> {
        sqlx::query_as(&format!("{WIDGET_SELECT} WHERE d.tenant_id = $1 AND w.id = $2"))
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    /// Create a widget pin.
    pub async fn create(&self, new: &NewWidget) -> Result<Widget> {
        sqlx::query_as(
            "INSERT INTO widgets (id, dashboard_id, source_workflow_id, source_node_id, \
             title, layout, config_overrides, auto_refresh_interval, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             RETURNING id, dashboard_id, source_workflow_id, source_node_id, title, \
                       layout, config_overrides, auto_refresh_interval, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(new.dashboard_id)
        .bind(new.source_workflow_id)
        .bind(&new.source_node_id)
        .bind(&new.title)
        .bind(&new.layout)
        .bind(&new.config_overrides)
        .bind(new.auto_refresh_interval)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Update a widget's presentation fields (tenant-scoped via the join).
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        new: &NewWidget,
    ) -> Result<Option<Widget>> {
        sqlx::query_as(
            "UPDATE widgets w SET title = $3, layout = $4, config_overrides = $5, \
             auto_refresh_interval = $6 \
             FROM dashboards d \
             WHERE d.id = w.dashboard_id AND d.tenant_id = $1 AND w.id = $2 \
             RETURNING w.id, w.dashboard_id, w.source_workflow_id, w.source_node_id, \
                       w.title, w.layout, w.config_overrides, w.auto_refresh_interval, \
                       w.created_at",
        )
        .bind(tenant_id)
        .bind(id)
        .bind(&new.title)
        .bind(&new.layout)
        .bind(&new.config_overrides)
        .bind(new.auto_refresh_interval)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Delete a widget (tenant-scoped via the join).
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query(
            "DELETE FROM widgets w USING dashboards d \
             WHERE d.id = w.dashboard_id AND d.tenant_id = $1 AND w.id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(deleted.rows_affected() > 0)
    }
}
