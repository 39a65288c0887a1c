//! Workflow persistence with version snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use lattice_error::Result;

use super::db_error;

/// A stored workflow.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Workflow {
    /// Workflow id.
    pub id:          Uuid,
    /// Owning tenant.
    pub tenant_id:   Uuid,
    /// Display name.
    pub name:        String,
    /// Optional description.
    pub description: Option<String>,
    /// The canvas graph as the frontend owns it.
    #[sqlx(rename = "graph_json")]
    pub graph:       Value,
    /// Monotonic version, bumped on every update.
    pub version:     i32,
    /// Creation timestamp.
    pub created_at:  DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at:  DateTime<Utc>,
}

/// One snapshot in a workflow's history.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WorkflowVersion {
    /// Snapshot id.
    pub id:          Uuid,
    /// Workflow the snapshot belongs to.
    pub workflow_id: Uuid,
    /// Version number at snapshot time.
    pub version:     i32,
    /// Graph at snapshot time.
    #[sqlx(rename = "graph_json")]
    pub graph:       Value,
    /// Snapshot timestamp.
    pub created_at:  DateTime<Utc>,
}

/// Create/update payload.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    /// Display name.
    pub name:        String,
    /// Optional description.
    pub description: Option<String>,
    /// Canvas graph.
    pub graph:       Value,
}

/// Workflow repository.
#[derive(Clone)]
pub struct WorkflowRepo {
    pool: PgPool,
}

const COLUMNS: &str =
    "id, tenant_id, name, description, graph_json, version, created_at, updated_at";

impl WorkflowRepo {
    /// Create a repository over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List a tenant's workflows, most recently updated first.
    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<Workflow>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM workflows WHERE tenant_id = $1 ORDER BY updated_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Fetch one workflow. Absent and cross-tenant both read as `None`.
    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Workflow>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM workflows WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Create a workflow at version 1.
    pub async fn create(&self, tenant_id: Uuid, new: &NewWorkflow) -> Result<Workflow> {
        sqlx::query_as(&format!(
            "INSERT INTO workflows \
             (id, tenant_id, name, description, graph_json, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 1, now(), now()) \
             RETURNING {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.graph)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Update a workflow, snapshotting the previous graph in the same
    /// transaction. Returns `None` when the workflow is absent for this
    /// tenant.
    pub async fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        new: &NewWorkflow,
    ) -> Result<Option<Workflow>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let snapshotted = sqlx::query(
            "INSERT INTO workflow_versions (id, workflow_id, version, graph_json, created_at) \
             SELECT $1, id, version, graph_json, now() FROM workflows \
             WHERE tenant_id = $2 AND id = $3",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if snapshotted.rows_affected() == 0 {
            return Ok(None);
        }

        let workflow: Workflow = sqlx::query_as(&format!(
            "UPDATE workflows SET name = $3, description = $4, graph_json = $5, \
             version = version + 1, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(tenant_id)
        .bind(id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.graph)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Some(workflow))
    }

    /// Delete a workflow. Returns whether a row existed.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM workflows WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(deleted.rows_affected() > 0)
    }

    /// List version snapshots, newest first.
    pub async fn versions(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<Vec<WorkflowVersion>> {
        sqlx::query_as(
            "SELECT v.id, v.workflow_id, v.version, v.graph_json, v.created_at \
             FROM workflow_versions v \
             JOIN workflows w ON w.id = v.workflow_id \
             WHERE w.tenant_id = $1 AND v.workflow_id = $2 \
             ORDER BY v.version DESC",
        )
        .bind(tenant_id)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    /// Roll a workflow back to a snapshot: the current graph is
    /// snapshotted, then the stored version's graph becomes current (under
    /// a bumped version number). Returns `None` when the workflow or the
    /// snapshot is absent for this tenant.
    pub async fn rollback(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        version_id: Uuid,
    ) -> Result<Option<Workflow>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let snapshot: Option<(Value,)> = sqlx::query_as(
            "SELECT v.graph_json FROM workflow_versions v \
             JOIN workflows w ON w.id = v.workflow_id \
             WHERE w.tenant_id = $1 AND v.workflow_id = $2 AND v.id = $3",
        )
        .bind(tenant_id)
        .bind(workflow_id)
        .bind(version_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        let Some((graph,)) = snapshot else {
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO workflow_versions (id, workflow_id, version, graph_json, created_at) \
             SELECT $1, id, version, graph_json, now() FROM workflows \
             WHERE tenant_id = $2 AND id = $3",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        let workflow: Workflow = sqlx::query_as(&format!(
            "UPDATE workflows SET graph_json = $3, version = version + 1, updated_at = now() \
             WHERE tenant_id = $1 AND id = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(tenant_id)
        .bind(workflow_id)
        .bind(&graph)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Some(workflow))
    }
}
