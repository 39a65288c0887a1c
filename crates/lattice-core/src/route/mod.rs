//! Query router: segment dispatch to backing stores.
//!
//! The single point of knowledge about store clients. Nodes and the
//! compiler express intent, not destination; the router decides where a
//! segment runs and returns one uniform result shape. The router records
//! timing and row-count telemetry per call and never retries — retry is a
//! caller-level decision.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use lattice_error::RouterError;

use crate::compile::{CompiledSegment, TargetStore};
use crate::graph::Dtype;
use crate::store::{AnalyticalStore, LiveStore, PointStore};

/// Column metadata in a query result.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name:  String,
    /// Normalized engine dtype.
    pub dtype: Dtype,
}

/// Result from executing one compiled segment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueryResult {
    /// Column metadata in projection order.
    pub columns:      Vec<ColumnMeta>,
    /// Rows as JSON objects keyed by column name.
    pub rows:         Vec<Map<String, Value>>,
    /// Row count of this result.
    pub total_rows:   u64,
    /// Which backing store answered.
    pub source_store: String,
}

/// Dispatches compiled query segments to the appropriate backing store.
pub struct QueryRouter {
    analytical: Arc<AnalyticalStore>,
    live:       Arc<LiveStore>,
    point:      Arc<PointStore>,
    /// Wall-time budget per dispatch; doubles as the cancellation deadline.
    budget:     Duration,
}

impl QueryRouter {
    /// Create a router over the three read stores.
    #[must_use]
    pub fn new(
        analytical: Arc<AnalyticalStore>,
        live: Arc<LiveStore>,
        point: Arc<PointStore>,
    ) -> Self {
        Self {
            analytical,
            live,
            point,
            budget: Duration::from_secs(30),
        }
    }

    /// Override the per-dispatch wall-time budget.
    #[must_use]
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Route a compiled segment to the correct backing store and execute.
    ///
    /// # Errors
    ///
    /// [`RouterError`] for unknown targets, unreachable stores, store-side
    /// query failures, and budget overruns.
    pub async fn execute(&self, segment: &CompiledSegment) -> Result<QueryResult, RouterError> {
        self.execute_with_budget(segment, self.budget).await
    }

    /// Route a segment with an explicit wall-time budget (the preview path
    /// runs tighter than the widget path).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::execute`].
    pub async fn execute_with_budget(
        &self,
        segment: &CompiledSegment,
        budget: Duration,
    ) -> Result<QueryResult, RouterError> {
        let started = std::time::Instant::now();
        let store = segment.target.as_str();

        let dispatch = async {
            match segment.target {
                TargetStore::Analytical => {
                    self.analytical.execute(&segment.sql, &segment.params).await
                },
                TargetStore::Live => self.live.execute(&segment.sql, &segment.params).await,
                TargetStore::Point => self.point.lookup(&segment.params).await,
            }
        };

        let result = tokio::time::timeout(budget, dispatch).await.map_err(|_| {
            RouterError::Timeout {
                store:     store.to_string(),
                budget_ms: budget.as_millis() as u64,
            }
        })??;

        tracing::info!(
            target_store = store,
            duration_ms = started.elapsed().as_millis() as u64,
            rows = result.total_rows,
            "query_executed"
        );
        Ok(result)
    }

    /// Execute segments in submitted order.
    ///
    /// Observable side effects are never reordered; the per-workflow status
    /// stream depends on submission order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing segment and returns its error.
    pub async fn execute_all(
        &self,
        segments: &[CompiledSegment],
    ) -> Result<Vec<QueryResult>, RouterError> {
        let mut results = Vec::with_capacity(segments.len());
        for segment in segments {
            results.push(self.execute(segment).await?);
        }
        Ok(results)
    }

    /// The configured wall-time budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }
}
