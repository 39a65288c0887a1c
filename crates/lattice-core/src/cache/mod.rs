//! Cache-and-execute layer.
//!
//! Sits between the request layer and the compiler + router: fingerprint
//! the request, read through the fast-store cache, bound resources, and on
//! miss compile-and-execute under per-process single-flight, then write
//! back with a TTL derived from the terminal segment's target store.
//!
//! Fail-open discipline: a cache read or write failure MUST NOT fail the
//! request. Reads degrade to misses, writes are skipped, both are logged.
//! A downstream store failure is a real failure and surfaces.

mod fingerprint;
mod single_flight;

pub use fingerprint::{fingerprint, FingerprintInput};
pub use single_flight::SingleFlight;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use lattice_error::{CoreError, Result};

use crate::compile::{SegmentPlan, TargetStore, WorkflowCompiler, DEFAULT_HARD_CAP};
use crate::config::{CacheTtlConfig, ExecutionBudget};
use crate::graph::{Dtype, NodeKind, WorkflowGraph};
use crate::route::{ColumnMeta, QueryResult, QueryRouter};
use crate::sql::{self, BinaryOp, SqlExpr};

/// Which request path a query came through; selects the cache namespace,
/// TTL table, and execution budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePath {
    /// Canvas preview: tight budgets, short-lived entries.
    Preview,
    /// Widget data (dashboards and embeds): heavier budgets.
    Widget,
}

impl CachePath {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Widget => "widget",
        }
    }

    const fn subquery_alias(self) -> &'static str {
        match self {
            Self::Preview => "preview_q",
            Self::Widget => "widget_q",
        }
    }
}

/// One cacheable query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Tenant scope, derived from the authenticated principal.
    pub tenant_id:        Uuid,
    /// The node whose output is requested.
    pub target_node_id:   String,
    /// The workflow graph (inline for preview, loaded for widgets).
    pub graph:            WorkflowGraph,
    /// Widget config overrides, applied to the target node before
    /// fingerprinting and compilation.
    pub config_overrides: Option<Map<String, Value>>,
    /// Runtime filters appended to the terminal statement.
    pub filter_params:    Option<Map<String, Value>>,
    /// Page offset.
    pub offset:           u64,
    /// Page limit; clamped to the hard cap.
    pub limit:            u64,
}

/// The augmented query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Column metadata.
    pub columns:      Vec<ColumnMeta>,
    /// Result rows, at most `limit`.
    pub rows:         Vec<Map<String, Value>>,
    /// Total rows produced by the statement.
    pub total_rows:   u64,
    /// Wall time spent compiling and executing (zero-ish on cache hits).
    pub execution_ms: f64,
    /// Whether this response came from the cache.
    pub cache_hit:    bool,
    /// Echoed page offset.
    pub offset:       u64,
    /// Effective page limit.
    pub limit:        u64,
    /// Terminal node render config, lifted so the client needs no second
    /// round-trip (widget path only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_config: Option<Value>,
}

impl QueryResponse {
    fn empty(offset: u64, limit: u64, chart_config: Option<Value>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            total_rows: 0,
            execution_ms: 0.0,
            cache_hit: false,
            offset,
            limit,
            chart_config,
        }
    }
}

/// Read-through query cache over the compiler and router.
pub struct QueryCache {
    compiler:       WorkflowCompiler,
    router:         Arc<QueryRouter>,
    fast:           crate::store::FastStore,
    namespace:      String,
    ttl:            CacheTtlConfig,
    preview_budget: ExecutionBudget,
    widget_budget:  ExecutionBudget,
    flights:        SingleFlight<Option<(QueryResponse, TargetStore)>>,
}

impl QueryCache {
    /// Create the cache layer.
    #[must_use]
    pub fn new(
        compiler: WorkflowCompiler,
        router: Arc<QueryRouter>,
        fast: crate::store::FastStore,
        namespace: &str,
        ttl: CacheTtlConfig,
        preview_budget: ExecutionBudget,
        widget_budget: ExecutionBudget,
    ) -> Self {
        Self {
            compiler,
            router,
            fast,
            namespace: namespace.to_string(),
            ttl,
            preview_budget,
            widget_budget,
            flights: SingleFlight::new(),
        }
    }

    /// Serve one request: fingerprint, cache read, single-flight
    /// compile-and-execute on miss, write-back.
    ///
    /// # Errors
    ///
    /// Compile and router errors surface; cache errors never do.
    pub async fn fetch(&self, path: CachePath, request: &QueryRequest) -> Result<QueryResponse> {
        let limit = request.limit.min(DEFAULT_HARD_CAP);

        // Overrides compose the widget's query; they must be in place both
        // for the fingerprint and for compilation so a cached entry always
        // matches the overlaid graph.
        let mut graph = request.graph.clone();
        if let Some(overrides) = request.config_overrides.as_ref().filter(|o| !o.is_empty()) {
            if let Some(node) = graph.node_mut(&request.target_node_id) {
                node.apply_config_overrides(overrides);
            }
        }

        let fp = fingerprint(&FingerprintInput {
            tenant_id:        request.tenant_id,
            target_node_id:   &request.target_node_id,
            graph:            &graph,
            config_overrides: request.config_overrides.as_ref(),
            filter_params:    request.filter_params.as_ref(),
            offset:           request.offset,
            limit,
        });
        let cache_key = format!("{}:{}:{fp}", self.namespace, path.prefix());

        match self.fast.get_json(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(mut response) = serde_json::from_value::<QueryResponse>(cached) {
                    response.cache_hit = true;
                    return Ok(response);
                }
                tracing::warn!(key = %cache_key, "malformed cache entry ignored");
            },
            Ok(None) => {},
            Err(error) => {
                tracing::warn!(key = %cache_key, %error, "cache read failed, continuing as miss");
            },
        }

        let shared = self
            .flights
            .run(&cache_key, || async {
                match self.compute(path, &graph, request, limit).await {
                    Ok((response, store)) => {
                        self.write_back(path, &cache_key, &response, store).await;
                        Some((response, store))
                    },
                    Err(error) => {
                        tracing::debug!(key = %cache_key, %error, "query computation failed");
                        None
                    },
                }
            })
            .await;

        match shared {
            Some((response, _)) => Ok(response),
            // The flight failed (or its leader vanished); recompute here so
            // the caller gets the real, typed error.
            None => {
                let (response, store) = self.compute(path, &graph, request, limit).await?;
                self.write_back(path, &cache_key, &response, store).await;
                Ok(response)
            },
        }
    }

    async fn compute(
        &self,
        path: CachePath,
        graph: &WorkflowGraph,
        request: &QueryRequest,
        limit: u64,
    ) -> Result<(QueryResponse, TargetStore)> {
        let started = std::time::Instant::now();

        let chart_config = (path == CachePath::Widget)
            .then(|| lift_chart_config(graph, &request.target_node_id))
            .flatten();

        let mut plans = self.compiler.compile_subgraph(graph, &request.target_node_id)?;
        let Some(mut final_plan) = plans.pop() else {
            return Ok((
                QueryResponse::empty(request.offset, limit, chart_config),
                TargetStore::Analytical,
            ));
        };

        let budget = match path {
            CachePath::Preview => self.preview_budget,
            CachePath::Widget => self.widget_budget,
        };
        self.constrain(&mut final_plan, path, request, limit, budget);

        let mut segments = Vec::with_capacity(plans.len() + 1);
        for plan in &plans {
            segments.push(plan.render()?);
        }
        segments.push(final_plan.render()?);

        let wall_budget = Duration::from_secs(budget.max_execution_secs);
        let mut last: Option<QueryResult> = None;
        for segment in &segments {
            last = Some(
                self.router
                    .execute_with_budget(segment, wall_budget)
                    .await
                    .map_err(CoreError::from)?,
            );
        }
        let result = last.unwrap_or(QueryResult {
            columns:      Vec::new(),
            rows:         Vec::new(),
            total_rows:   0,
            source_store: final_plan.target.as_str().to_string(),
        });

        let mut rows = result.rows;
        rows.truncate(limit as usize);

        Ok((
            QueryResponse {
                columns: result.columns,
                rows,
                total_rows: result.total_rows,
                execution_ms: started.elapsed().as_secs_f64() * 1000.0,
                cache_hit: false,
                offset: request.offset,
                limit,
                chart_config,
            },
            final_plan.target,
        ))
    }

    /// Wrap the terminal statement with the pagination window, attach the
    /// execution budget, and append any runtime filters.
    fn constrain(
        &self,
        plan: &mut SegmentPlan,
        path: CachePath,
        request: &QueryRequest,
        limit: u64,
        budget: ExecutionBudget,
    ) {
        let Some(query) = plan.query.take() else {
            return;
        };

        let mut wrapped =
            sql::wrap_with_window(query, path.subquery_alias(), limit, request.offset);
        wrapped.settings = vec![
            ("max_execution_time".to_string(), budget.max_execution_secs),
            ("max_memory_usage".to_string(), budget.max_memory_bytes),
            ("max_rows_to_read".to_string(), budget.max_rows_to_read),
        ];

        if let Some(filters) = request.filter_params.as_ref() {
            for (index, (column, value)) in filters.iter().enumerate() {
                let (dtype, bound) = match value {
                    Value::Number(n) => (Dtype::Float64, Value::from(n.as_f64().unwrap_or(0.0))),
                    Value::Bool(b) => (Dtype::Bool, Value::Bool(*b)),
                    other => (
                        Dtype::String,
                        Value::String(other.as_str().unwrap_or_default().to_string()),
                    ),
                };
                wrapped.filters.push(SqlExpr::binary(
                    SqlExpr::col(column),
                    BinaryOp::Eq,
                    SqlExpr::Param {
                        name: format!("rf{index}"),
                        dtype,
                        value: bound,
                    },
                ));
            }
        }

        plan.limit = Some(limit);
        plan.offset = Some(request.offset);
        plan.query = Some(wrapped);
    }

    async fn write_back(
        &self,
        path: CachePath,
        cache_key: &str,
        response: &QueryResponse,
        store: TargetStore,
    ) {
        let ttl = self.ttl_for(path, store);
        match serde_json::to_value(response) {
            Ok(serialized) => {
                if let Err(error) = self.fast.set_json(cache_key, &serialized, ttl).await {
                    tracing::warn!(key = %cache_key, %error, "cache write failed, result not cached");
                }
            },
            Err(error) => {
                tracing::warn!(key = %cache_key, %error, "response not serializable for cache");
            },
        }
    }

    /// TTL derived from the answering store: live results go stale in
    /// seconds, analytical results in minutes.
    fn ttl_for(&self, path: CachePath, store: TargetStore) -> u64 {
        match path {
            CachePath::Preview => self.ttl.preview_secs,
            CachePath::Widget => match store {
                TargetStore::Live => self.ttl.widget_live_secs,
                TargetStore::Analytical | TargetStore::Point => self.ttl.widget_analytical_secs,
            },
        }
    }
}

/// Lift the terminal node's config for the client, defaulting `chart_type`
/// from the node kind so a bare output node still renders.
fn lift_chart_config(graph: &WorkflowGraph, target_node_id: &str) -> Option<Value> {
    let node = graph.node(target_node_id)?;
    let mut config = node.config();
    if !config.contains_key("chart_type") {
        let default = match node.kind() {
            Some(NodeKind::TableOutput) => Some("table"),
            Some(NodeKind::KpiOutput) => Some("kpi"),
            Some(NodeKind::ChartOutput) => Some("bar"),
            _ => None,
        };
        if let Some(kind) = default {
            config.insert("chart_type".to_string(), Value::String(kind.to_string()));
        }
    }
    Some(Value::Object(config))
}
