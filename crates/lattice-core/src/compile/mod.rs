//! Workflow compiler: DAG → ordered, dispatchable SQL segments.
//!
//! Pipeline:
//! 1. validate via the schema engine (cycles, unknown types, schemas);
//! 2. topologically order the nodes;
//! 3. fold per-node SQL builders, merging adjacent compatible operators
//!    into a single SELECT (an operator that cannot merge wraps the open
//!    statement as a subquery and continues);
//! 4. assign each segment a target store and dialect from its lineage's
//!    data-source freshness;
//! 5. install terminal `max_rows` limits through the AST.
//!
//! One segment is one SQL statement against one store. Join and union fold
//! their upstream statements in as aliased subqueries, so a lineage that
//! converges ends up in a single segment.

mod builder;
mod filters;

pub use filters::FilterOp;

use serde_json::Value;

use lattice_error::CompileError;

use crate::graph::WorkflowGraph;
use crate::schema::{SchemaEngine, SchemaMap};
use crate::sql::{self, BoundParam, Dialect, SelectQuery};

/// Default row cap installed on segments whose terminal declares none.
pub const DEFAULT_HARD_CAP: u64 = 10_000;

/// Which backing store a segment is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetStore {
    /// Columnar analytical store (ad-hoc and historical queries).
    Analytical,
    /// Incremental-view live store (realtime data).
    Live,
    /// Key-value store (point lookups by exact key).
    Point,
}

impl TargetStore {
    /// Wire name used in segments and telemetry.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Live => "live",
            Self::Point => "point",
        }
    }

    /// The SQL dialect emitted for this store. Point lookups carry no SQL;
    /// they nominally report the analytical dialect.
    #[must_use]
    pub const fn dialect(self) -> Dialect {
        match self {
            Self::Analytical | Self::Point => Dialect::Analytical,
            Self::Live => Dialect::Live,
        }
    }
}

/// Declared freshness of a data source, set in its config by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served by the live store.
    Realtime,
    /// Served by the analytical store.
    Analytical,
    /// Served by exact-key lookup.
    Point,
}

impl Freshness {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("realtime") => Self::Realtime,
            Some("point") => Self::Point,
            _ => Self::Analytical,
        }
    }

    /// Combine two lineages: mixed freshness downstream of a join/union
    /// uses the more restrictive (analytical) store.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Analytical
        }
    }

    const fn target(self) -> TargetStore {
        match self {
            Self::Realtime => TargetStore::Live,
            Self::Analytical => TargetStore::Analytical,
            Self::Point => TargetStore::Point,
        }
    }
}

/// A compiled segment before rendering: the statement AST plus routing
/// metadata. The cache layer wraps plans with pagination windows and
/// execution budgets before rendering.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    /// The statement, absent for point lookups.
    pub query:           Option<SelectQuery>,
    /// Target store.
    pub target:          TargetStore,
    /// Node ids merged into this statement, in merge order.
    pub source_node_ids: Vec<String>,
    /// Exact keys for point lookups.
    pub point_keys:      Vec<String>,
    /// Effective LIMIT installed by the terminal pass.
    pub limit:           Option<u64>,
    /// Effective OFFSET.
    pub offset:          Option<u64>,
}

impl SegmentPlan {
    /// Render this plan into a dispatchable segment.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` if the statement contains a construct the
    /// dialect cannot express.
    pub fn render(&self) -> Result<CompiledSegment, CompileError> {
        let dialect = self.target.dialect();
        let (sql_text, params) = match &self.query {
            Some(query) => {
                let rendered = sql::render(query, dialect)?;
                (rendered.sql, rendered.params)
            },
            None => (
                String::new(),
                self.point_keys
                    .iter()
                    .enumerate()
                    .map(|(i, key)| BoundParam {
                        name:  format!("key{i}"),
                        dtype: crate::graph::Dtype::String,
                        value: Value::String(key.clone()),
                    })
                    .collect(),
            ),
        };
        Ok(CompiledSegment {
            sql: sql_text,
            dialect,
            target: self.target,
            source_node_ids: self.source_node_ids.clone(),
            params,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// One SQL statement dispatchable against a single store.
#[derive(Debug, Clone)]
pub struct CompiledSegment {
    /// Rendered SQL (empty for point lookups).
    pub sql:             String,
    /// SQL dialect of `sql`.
    pub dialect:         Dialect,
    /// Target store.
    pub target:          TargetStore,
    /// Node ids merged into this statement.
    pub source_node_ids: Vec<String>,
    /// Bound parameters in placeholder order (lookup keys for point).
    pub params:          Vec<BoundParam>,
    /// Effective LIMIT.
    pub limit:           Option<u64>,
    /// Effective OFFSET.
    pub offset:          Option<u64>,
}

/// Compiles a workflow DAG into executable, merged SQL query segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowCompiler {
    engine: SchemaEngine,
}

impl WorkflowCompiler {
    /// Create a compiler around a schema engine.
    #[must_use]
    pub fn new(engine: SchemaEngine) -> Self {
        Self { engine }
    }

    /// Compile a full workflow DAG into rendered query segments.
    ///
    /// # Errors
    ///
    /// Any [`CompileError`]: cycle, unknown type, unresolved column,
    /// schema mismatch, formula parse failure, invalid filter.
    pub fn compile(&self, graph: &WorkflowGraph) -> Result<Vec<CompiledSegment>, CompileError> {
        self.compile_plans(graph)?.iter().map(SegmentPlan::render).collect()
    }

    /// Compile to segment plans, leaving rendering to the caller.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::compile`].
    pub fn compile_plans(&self, graph: &WorkflowGraph) -> Result<Vec<SegmentPlan>, CompileError> {
        let started = std::time::Instant::now();

        let schemas: SchemaMap = self.engine.propagate(graph)?;
        let mut plans = builder::build_and_merge(graph, &schemas)?;
        apply_limits(&mut plans);

        tracing::info!(
            node_count = graph.nodes.len(),
            segment_count = plans.len(),
            compilation_ms = started.elapsed().as_millis() as u64,
            "workflow_compiled"
        );
        Ok(plans)
    }

    /// Compile only the subgraph leading to a specific node.
    ///
    /// Used by the preview and widget-data paths.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::compile`].
    pub fn compile_subgraph(
        &self,
        graph: &WorkflowGraph,
        target_node_id: &str,
    ) -> Result<Vec<SegmentPlan>, CompileError> {
        self.compile_plans(&graph.subgraph(target_node_id))
    }

    /// The schema engine backing this compiler.
    #[must_use]
    pub const fn engine(&self) -> &SchemaEngine {
        &self.engine
    }
}

/// Install terminal `max_rows` limits. Each segment feeding an output node
/// gets that terminal's cap (minimum across terminals sharing the segment);
/// everything else gets the default hard cap. Existing tighter limits (from
/// explicit limit nodes) are kept.
fn apply_limits(plans: &mut [SegmentPlan]) {
    for plan in plans {
        let cap = plan.limit.unwrap_or(DEFAULT_HARD_CAP);
        if let Some(query) = plan.query.as_mut() {
            let effective = query.limit.map_or(cap, |existing| existing.min(cap));
            query.limit = Some(effective);
            plan.limit = Some(effective);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn graph(value: serde_json::Value) -> WorkflowGraph {
        serde_json::from_value(value).expect("valid graph json")
    }

    fn compiler() -> WorkflowCompiler {
        WorkflowCompiler::new(SchemaEngine::new())
    }

    fn trades_source(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "data_source",
            "data": {"config": {"table": "fct_trades", "columns": [
                {"name": "symbol", "dtype": "string"},
                {"name": "price", "dtype": "float64"},
                {"name": "quantity", "dtype": "int64"}
            ]}}
        })
    }

    #[test]
    fn test_filter_sort_merge_into_one_segment() {
        // Scenario: data_source -> filter(symbol = "AAPL") -> sort(price desc) -> table_output.
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "flt", "type": "filter", "data": {"config": {
                    "column": "symbol", "operator": "=", "value": "AAPL"}}},
                {"id": "srt", "type": "sort", "data": {"config": {
                    "sort_by": [{"column": "price", "direction": "desc"}]}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "flt"},
                {"source": "flt", "target": "srt"},
                {"source": "srt", "target": "out"}
            ]
        }));

        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.target, TargetStore::Analytical);
        assert_eq!(
            segment.sql,
            "SELECT * FROM \"fct_trades\" WHERE (\"symbol\" = {p0:String}) \
             ORDER BY \"price\" DESC LIMIT 10000"
        );
        assert_eq!(segment.params.len(), 1);
        assert_eq!(segment.params[0].value, json!("AAPL"));
        assert_eq!(segment.source_node_ids, vec!["src", "flt", "srt"]);
    }

    #[test]
    fn test_group_by_extends_select() {
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "grp", "type": "group_by", "data": {"config": {
                    "group_columns": ["symbol"],
                    "aggregations": [{"column": "quantity", "function": "SUM",
                                       "alias": "total_quantity", "output_dtype": "int64"}]}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "grp"},
                {"source": "grp", "target": "out"}
            ]
        }));

        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1);
        assert_eq!(
            segments[0].sql,
            "SELECT \"symbol\", sum(\"quantity\") AS \"total_quantity\" FROM \"fct_trades\" \
             GROUP BY \"symbol\" LIMIT 10000"
        );
    }

    #[test]
    fn test_filter_after_group_by_wraps_subquery() {
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "grp", "type": "group_by", "data": {"config": {
                    "group_columns": ["symbol"],
                    "aggregations": [{"column": "quantity", "function": "SUM", "alias": "total"}]}}},
                {"id": "flt", "type": "filter", "data": {"config": {
                    "column": "total", "operator": ">", "value": "100"}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "grp"},
                {"source": "grp", "target": "flt"},
                {"source": "flt", "target": "out"}
            ]
        }));

        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1);
        let sql = &segments[0].sql;
        assert!(sql.contains("FROM (SELECT"), "group-by result must be wrapped: {sql}");
        assert!(sql.contains("WHERE (\"total\" > {p0:Float64})"), "late filter: {sql}");
    }

    #[test]
    fn test_select_drops_unknown_columns_from_projection() {
        // The schema transform silently drops unknown select names; the
        // emitted SQL must do the same or the store rejects the statement.
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "sel", "type": "select", "data": {"config": {
                    "columns": ["symbol", "volume", "price"]}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "sel"},
                {"source": "sel", "target": "out"}
            ]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(
            segments[0].sql,
            "SELECT \"symbol\", \"price\" FROM \"fct_trades\" LIMIT 10000"
        );
    }

    #[test]
    fn test_output_max_rows_controls_limit() {
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "out", "type": "table_output", "data": {"config": {"max_rows": 500}}}
            ],
            "edges": [{"source": "src", "target": "out"}]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1);
        assert!(segments[0].sql.ends_with("LIMIT 500"));
        assert_eq!(segments[0].limit, Some(500));
    }

    #[test]
    fn test_shared_segment_takes_min_limit() {
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "a", "type": "table_output", "data": {"config": {"max_rows": 2000}}},
                {"id": "b", "type": "chart_output", "data": {"config": {"max_rows": 300}}}
            ],
            "edges": [
                {"source": "src", "target": "a"},
                {"source": "src", "target": "b"}
            ]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1, "terminals sharing an upstream share one segment");
        assert_eq!(segments[0].limit, Some(300));
    }

    #[test]
    fn test_join_combines_upstream_segments() {
        let g = graph(json!({
            "nodes": [
                trades_source("left_src"),
                {"id": "right_src", "type": "data_source", "data": {"config": {
                    "table": "dim_instruments",
                    "columns": [
                        {"name": "symbol", "dtype": "string"},
                        {"name": "sector", "dtype": "string"}
                    ]}}},
                {"id": "j", "type": "join", "data": {"config": {
                    "join_type": "inner", "left_key": "symbol", "right_key": "symbol"}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "left_src", "target": "j"},
                {"source": "right_src", "target": "j"},
                {"source": "j", "target": "out"}
            ]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments.len(), 1);
        let sql = &segments[0].sql;
        assert!(sql.contains("INNER JOIN"), "join keyword: {sql}");
        assert!(sql.contains("\"_left\".\"symbol\" = \"_right\".\"symbol\""), "on clause: {sql}");
        assert!(sql.contains("\"_right\".\"sector\" AS \"sector\""), "right projection: {sql}");
        assert!(
            segments[0].source_node_ids.contains(&"left_src".to_string())
                && segments[0].source_node_ids.contains(&"right_src".to_string()),
            "both lineages folded into the segment"
        );
    }

    #[test]
    fn test_realtime_lineage_targets_live_store() {
        let g = graph(json!({
            "nodes": [
                {"id": "src", "type": "data_source", "data": {"config": {
                    "table": "positions", "freshness": "realtime",
                    "columns": [{"name": "symbol", "dtype": "string"}]}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [{"source": "src", "target": "out"}]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments[0].target, TargetStore::Live);
        assert_eq!(segments[0].dialect, Dialect::Live);
    }

    #[test]
    fn test_mixed_join_downgrades_to_analytical() {
        let g = graph(json!({
            "nodes": [
                {"id": "live_src", "type": "data_source", "data": {"config": {
                    "table": "positions", "freshness": "realtime",
                    "columns": [{"name": "symbol", "dtype": "string"}]}}},
                trades_source("hist_src"),
                {"id": "j", "type": "join", "data": {"config": {
                    "join_type": "left", "left_key": "symbol", "right_key": "symbol"}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "live_src", "target": "j"},
                {"source": "hist_src", "target": "j"},
                {"source": "j", "target": "out"}
            ]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments[0].target, TargetStore::Analytical);
    }

    #[test]
    fn test_union_requires_compatible_schemas() {
        let g = graph(json!({
            "nodes": [
                trades_source("a"),
                {"id": "b", "type": "data_source", "data": {"config": {
                    "table": "other", "columns": [{"name": "x", "dtype": "string"}]}}},
                {"id": "u", "type": "union", "data": {"config": {}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "a", "target": "u"},
                {"source": "b", "target": "u"},
                {"source": "u", "target": "out"}
            ]
        }));
        let err = compiler().compile(&g).expect_err("mismatched union must fail");
        assert_eq!(err.kind, lattice_error::CompileErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_point_lineage_rejects_relational_operators() {
        let g = graph(json!({
            "nodes": [
                {"id": "src", "type": "data_source", "data": {"config": {
                    "table": "quotes", "freshness": "point", "keys": ["quote:AAPL"],
                    "columns": [{"name": "key", "dtype": "string"}]}}},
                {"id": "flt", "type": "filter", "data": {"config": {
                    "column": "key", "operator": "=", "value": "x"}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "flt"},
                {"source": "flt", "target": "out"}
            ]
        }));
        let err = compiler().compile(&g).expect_err("must reject");
        assert_eq!(err.kind, lattice_error::CompileErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_point_lookup_segment_carries_keys() {
        let g = graph(json!({
            "nodes": [
                {"id": "src", "type": "data_source", "data": {"config": {
                    "table": "quotes", "freshness": "point",
                    "keys": ["quote:AAPL", "quote:MSFT"],
                    "columns": [{"name": "key", "dtype": "string"}]}}},
                {"id": "out", "type": "kpi_output", "data": {"config": {}}}
            ],
            "edges": [{"source": "src", "target": "out"}]
        }));
        let segments = compiler().compile(&g).expect("compiles");
        assert_eq!(segments[0].target, TargetStore::Point);
        assert!(segments[0].sql.is_empty());
        assert_eq!(segments[0].params.len(), 2);
        assert_eq!(segments[0].params[1].value, json!("quote:MSFT"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let g = graph(json!({
            "nodes": [
                trades_source("src"),
                {"id": "f", "type": "formula", "data": {"config": {
                    "expression": "[price] * [quantity]", "output_column": "notional"}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [
                {"source": "src", "target": "f"},
                {"source": "f", "target": "out"}
            ]
        }));
        let first = compiler().compile(&g).expect("compiles");
        let second = compiler().compile(&g).expect("compiles");
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.sql, b.sql);
        }
        assert!(first[0].sql.contains("(\"price\" * \"quantity\") AS \"notional\""));
    }

    #[test]
    fn test_empty_graph_compiles_to_nothing() {
        let g = WorkflowGraph::default();
        assert!(compiler().compile(&g).expect("compiles").is_empty());
    }

    #[test]
    fn test_dangling_operator_without_source_produces_nothing() {
        let g = graph(json!({
            "nodes": [
                {"id": "flt", "type": "filter", "data": {"config": {}}},
                {"id": "out", "type": "table_output", "data": {"config": {}}}
            ],
            "edges": [{"source": "flt", "target": "out"}]
        }));
        assert!(compiler().compile(&g).expect("compiles").is_empty());
    }
}
