//! Workflow execution: records, status streaming, cancellation.
//!
//! An execution is owned by the process that accepted it: one spawned
//! owner task compiles, dispatches segments in order, and publishes status
//! transitions on the per-execution channel. The record lives in the fast
//! store under a TTL so any process can answer status reads.
//!
//! Frame ordering contract: per segment, every source node gets `running`
//! then `completed`/`failed`, and the terminal `__workflow__` frame comes
//! after every segment's terminal frame. At most one terminal
//! whole-workflow frame is published per execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lattice_error::{CoreError, Result};

use crate::channel::ChannelHub;
use crate::compile::WorkflowCompiler;
use crate::graph::WorkflowGraph;
use crate::route::QueryRouter;
use crate::store::FastStore;

/// Pseudo-node id for compiler-stage events.
pub const COMPILER_NODE: &str = "__compiler__";
/// Pseudo-node id for whole-workflow events.
pub const WORKFLOW_NODE: &str = "__workflow__";

/// Execution records expire from the fast store after one hour.
const EXECUTION_TTL_SECS: u64 = 3_600;

/// Whole-workflow execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Per-node status within an execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    /// `pending`, `running`, `completed`, `failed`, or `skipped`.
    pub status:         String,
    /// When the node started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at:     Option<String>,
    /// When the node finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at:   Option<String>,
    /// Rows produced by the node's segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<u64>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:          Option<String>,
}

/// The persisted execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Execution id.
    pub id:            Uuid,
    /// Executed workflow.
    pub workflow_id:   Uuid,
    /// Owning tenant.
    pub tenant_id:     Uuid,
    /// Whole-workflow status.
    pub status:        ExecutionStatus,
    /// Start timestamp (RFC 3339).
    pub started_at:    String,
    /// Completion timestamp, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at:  Option<String>,
    /// Per-node statuses.
    pub node_statuses: BTreeMap<String, NodeStatus>,
}

impl ExecutionRecord {
    fn new(workflow_id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            tenant_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            node_statuses: BTreeMap::new(),
        }
    }
}

/// Fast-store persistence for execution records.
#[derive(Clone)]
pub struct ExecutionStore {
    fast:      FastStore,
    namespace: String,
}

impl ExecutionStore {
    /// Create a store over the shared fast store.
    #[must_use]
    pub fn new(fast: FastStore, namespace: &str) -> Self {
        Self {
            fast,
            namespace: namespace.to_string(),
        }
    }

    fn key(&self, tenant_id: Uuid, execution_id: Uuid) -> String {
        format!("{}:{tenant_id}:execution:{execution_id}", self.namespace)
    }

    /// Persist a record with the standard TTL.
    ///
    /// # Errors
    ///
    /// `CoreError::Cache` on fast-store failure.
    pub async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        let key = self.key(record.tenant_id, record.id);
        let value = serde_json::to_value(record)?;
        self.fast.set_json(&key, &value, EXECUTION_TTL_SECS).await
    }

    /// Load a record. `None` when absent or expired; cross-tenant reads
    /// miss by construction because the tenant id is part of the key.
    ///
    /// # Errors
    ///
    /// `CoreError::Cache` on fast-store failure.
    pub async fn load(&self, tenant_id: Uuid, execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let key = self.key(tenant_id, execution_id);
        match self.fast.get_json(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Starts, tracks, and cancels workflow executions.
pub struct ExecutionManager {
    compiler: WorkflowCompiler,
    router:   Arc<QueryRouter>,
    hub:      Arc<ChannelHub>,
    store:    ExecutionStore,
    tokens:   DashMap<Uuid, CancellationToken>,
}

impl ExecutionManager {
    /// Create an execution manager.
    #[must_use]
    pub fn new(
        compiler: WorkflowCompiler,
        router: Arc<QueryRouter>,
        hub: Arc<ChannelHub>,
        store: ExecutionStore,
    ) -> Self {
        Self {
            compiler,
            router,
            hub,
            store,
            tokens: DashMap::new(),
        }
    }

    /// The record store (for status reads).
    #[must_use]
    pub fn store(&self) -> &ExecutionStore {
        &self.store
    }

    /// Accept an execution: persist the pending record, spawn the owner
    /// task, and return immediately.
    ///
    /// # Errors
    ///
    /// Fails only if the initial record cannot be persisted — without it,
    /// status reads would 404 on an execution we accepted.
    pub async fn start(
        self: &Arc<Self>,
        tenant_id: Uuid,
        workflow_id: Uuid,
        graph: WorkflowGraph,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord::new(workflow_id, tenant_id);
        self.store.save(&record).await?;

        let token = CancellationToken::new();
        self.tokens.insert(record.id, token.clone());

        let manager = Arc::clone(self);
        let spawned = record.clone();
        tokio::spawn(async move {
            manager.run(spawned, graph, token).await;
        });

        Ok(record)
    }

    /// Request cancellation of a running execution.
    ///
    /// # Errors
    ///
    /// `NotFound` for absent or cross-tenant executions, `Conflict` when
    /// the execution already reached a terminal status.
    pub async fn cancel(&self, tenant_id: Uuid, execution_id: Uuid) -> Result<()> {
        let mut record = self
            .store
            .load(tenant_id, execution_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Execution"))?;

        if record.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "execution is already {}",
                record.status.as_str()
            )));
        }

        record.status = ExecutionStatus::Cancelled;
        record.completed_at = Some(Utc::now().to_rfc3339());
        self.store.save(&record).await?;

        self.hub
            .publish_execution_status(tenant_id, execution_id, WORKFLOW_NODE, "cancelled", json!({}))
            .await;

        if let Some((_, token)) = self.tokens.remove(&execution_id) {
            token.cancel();
        }
        Ok(())
    }

    /// The owner task: compile, dispatch segments in order, publish status
    /// transitions, finalize the record.
    async fn run(self: Arc<Self>, mut record: ExecutionRecord, graph: WorkflowGraph, token: CancellationToken) {
        let tenant_id = record.tenant_id;
        let execution_id = record.id;

        let segments = match self.compiler.compile(&graph) {
            Ok(segments) => segments,
            Err(error) => {
                record.status = ExecutionStatus::Failed;
                record.completed_at = Some(Utc::now().to_rfc3339());
                record.node_statuses.insert(COMPILER_NODE.to_string(), NodeStatus {
                    status: "failed".to_string(),
                    error: Some(error.to_string()),
                    ..NodeStatus::default()
                });
                self.persist(&record).await;
                self.hub
                    .publish_execution_status(
                        tenant_id,
                        execution_id,
                        COMPILER_NODE,
                        "failed",
                        json!({"error": error.to_string()}),
                    )
                    .await;
                self.tokens.remove(&execution_id);
                return;
            },
        };

        record.status = ExecutionStatus::Running;
        self.persist(&record).await;
        self.hub
            .publish_execution_status(tenant_id, execution_id, WORKFLOW_NODE, "running", json!({}))
            .await;

        for segment in segments {
            if token.is_cancelled() {
                // cancel() already wrote the terminal record and frame.
                self.tokens.remove(&execution_id);
                return;
            }

            let now = Utc::now().to_rfc3339();
            for node_id in &segment.source_node_ids {
                record.node_statuses.insert(node_id.clone(), NodeStatus {
                    status: "running".to_string(),
                    started_at: Some(now.clone()),
                    ..NodeStatus::default()
                });
                self.hub
                    .publish_execution_status(tenant_id, execution_id, node_id, "running", json!({}))
                    .await;
            }
            self.persist(&record).await;

            let router = Arc::clone(&self.router);
            let dispatched = segment.clone();
            let mut handle = tokio::spawn(async move { router.execute(&dispatched).await });

            let outcome = tokio::select! {
                joined = &mut handle => joined,
                () = token.cancelled() => {
                    // The segment is already running against its store; a
                    // detached reconciler persists its outcome when it
                    // lands so the client can reconcile after cancel.
                    let manager = Arc::clone(&self);
                    let reconcile = segment.clone();
                    tokio::spawn(async move {
                        if let Ok(result) = handle.await {
                            manager.reconcile_after_cancel(tenant_id, execution_id, &reconcile, result.map(|r| r.total_rows)).await;
                        }
                    });
                    self.tokens.remove(&execution_id);
                    return;
                },
            };

            let result = match outcome {
                Ok(result) => result,
                Err(join_error) => {
                    Err(lattice_error::RouterError::QueryFailed {
                        store:  segment.target.as_str().to_string(),
                        detail: format!("dispatch task failed: {join_error}"),
                    })
                },
            };

            match result {
                Ok(query_result) => {
                    let finished = Utc::now().to_rfc3339();
                    for node_id in &segment.source_node_ids {
                        let entry = record.node_statuses.entry(node_id.clone()).or_default();
                        entry.status = "completed".to_string();
                        entry.completed_at = Some(finished.clone());
                        entry.rows_processed = Some(query_result.total_rows);
                        self.hub
                            .publish_execution_status(
                                tenant_id,
                                execution_id,
                                node_id,
                                "completed",
                                json!({"rows_processed": query_result.total_rows}),
                            )
                            .await;
                    }
                    self.persist(&record).await;
                },
                Err(error) => {
                    // Per-segment failure publishes immediately and halts
                    // subsequent segments; completed segments keep their
                    // status.
                    for node_id in &segment.source_node_ids {
                        let entry = record.node_statuses.entry(node_id.clone()).or_default();
                        entry.status = "failed".to_string();
                        entry.error = Some(error.to_string());
                        self.hub
                            .publish_execution_status(
                                tenant_id,
                                execution_id,
                                node_id,
                                "failed",
                                json!({"error": error.to_string()}),
                            )
                            .await;
                    }
                    record.status = ExecutionStatus::Failed;
                    record.completed_at = Some(Utc::now().to_rfc3339());
                    self.persist(&record).await;
                    self.hub
                        .publish_execution_status(
                            tenant_id,
                            execution_id,
                            WORKFLOW_NODE,
                            "failed",
                            json!({"error": error.to_string()}),
                        )
                        .await;
                    self.tokens.remove(&execution_id);
                    return;
                },
            }
        }

        if token.is_cancelled() {
            self.tokens.remove(&execution_id);
            return;
        }

        record.status = ExecutionStatus::Completed;
        record.completed_at = Some(Utc::now().to_rfc3339());
        self.persist(&record).await;
        self.hub
            .publish_execution_status(tenant_id, execution_id, WORKFLOW_NODE, "completed", json!({}))
            .await;
        self.tokens.remove(&execution_id);
    }

    /// Persist through a cancellation-aware merge: once cancel() has
    /// written the terminal record, the owner only contributes node
    /// statuses, never the whole-workflow status.
    async fn persist(&self, record: &ExecutionRecord) {
        let merged = match self.store.load(record.tenant_id, record.id).await {
            Ok(Some(stored)) if stored.status == ExecutionStatus::Cancelled
                && record.status != ExecutionStatus::Cancelled =>
            {
                let mut merged = stored;
                for (node_id, status) in &record.node_statuses {
                    merged.node_statuses.insert(node_id.clone(), status.clone());
                }
                merged
            },
            _ => record.clone(),
        };
        if let Err(error) = self.store.save(&merged).await {
            tracing::warn!(execution_id = %record.id, %error, "execution record save failed");
        }
    }

    /// Persist the outcome of a segment that completed after cancellation.
    async fn reconcile_after_cancel(
        &self,
        tenant_id: Uuid,
        execution_id: Uuid,
        segment: &crate::compile::CompiledSegment,
        outcome: std::result::Result<u64, lattice_error::RouterError>,
    ) {
        let Ok(Some(mut record)) = self.store.load(tenant_id, execution_id).await else {
            return;
        };
        let finished = Utc::now().to_rfc3339();
        for node_id in &segment.source_node_ids {
            let entry = record.node_statuses.entry(node_id.clone()).or_default();
            match &outcome {
                Ok(rows) => {
                    entry.status = "completed".to_string();
                    entry.completed_at = Some(finished.clone());
                    entry.rows_processed = Some(*rows);
                },
                Err(error) => {
                    entry.status = "failed".to_string();
                    entry.error = Some(error.to_string());
                },
            }
        }
        if let Err(error) = self.store.save(&record).await {
            tracing::warn!(%execution_id, %error, "post-cancel reconciliation save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let mut record = ExecutionRecord::new(Uuid::new_v4(), Uuid::new_v4());
        record.node_statuses.insert("n1".to_string(), NodeStatus {
            status: "completed".to_string(),
            rows_processed: Some(42),
            ..NodeStatus::default()
        });

        let value = serde_json::to_value(&record).expect("serializable");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["node_statuses"]["n1"]["rows_processed"], 42);
        assert!(value["node_statuses"]["n1"].get("error").is_none());

        let parsed: ExecutionRecord = serde_json::from_value(value).expect("parseable");
        assert_eq!(parsed.status, ExecutionStatus::Pending);
    }
}
