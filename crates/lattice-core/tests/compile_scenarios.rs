//! End-to-end compilation scenarios.
//!
//! These walk full canvas graphs through the schema engine and compiler
//! and pin down the emitted SQL shape, segment routing, and fingerprint
//! behavior the caching layer depends on.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use lattice_core::cache::{fingerprint, FingerprintInput};
use lattice_core::compile::{TargetStore, WorkflowCompiler};
use lattice_core::graph::WorkflowGraph;
use lattice_core::schema::SchemaEngine;

fn graph(value: Value) -> WorkflowGraph {
    WorkflowGraph::parse(&value).expect("valid graph")
}

fn compiler() -> WorkflowCompiler {
    WorkflowCompiler::new(SchemaEngine::new())
}

fn trades_source() -> Value {
    json!({
        "id": "src",
        "type": "data_source",
        "position": {"x": 0, "y": 0},
        "data": {"config": {"table": "fct_trades", "columns": [
            {"name": "symbol", "dtype": "string"},
            {"name": "price", "dtype": "float64"},
            {"name": "quantity", "dtype": "int64"}
        ]}}
    })
}

/// Filter → Sort → Table: one merged segment against the analytical store,
/// filter value bound, sort descending.
#[test]
fn filter_sort_table_compiles_to_one_analytical_segment() {
    let g = graph(json!({
        "nodes": [
            trades_source(),
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
    assert_eq!(segments.len(), 1, "adjacent compatible operators merge into one statement");

    let segment = &segments[0];
    assert_eq!(segment.target, TargetStore::Analytical);
    assert_eq!(
        segment.sql,
        "SELECT * FROM \"fct_trades\" WHERE (\"symbol\" = {p0:String}) \
         ORDER BY \"price\" DESC LIMIT 10000"
    );
    assert_eq!(segment.params.len(), 1);
    assert_eq!(segment.params[0].value, json!("AAPL"));
}

/// Group-by sum: keys plus aggregate alias in one statement.
#[test]
fn group_by_sum_compiles_aggregate_projection() {
    let g = graph(json!({
        "nodes": [
            trades_source(),
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

    // Schema propagation agrees with the emitted projection.
    let schemas = SchemaEngine::new().propagate(&g).expect("propagates");
    let names: Vec<&str> = schemas["grp"].iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["symbol", "total_quantity"]);
}

/// Two calls over the same graph emit identical canonicalized SQL.
#[test]
fn compilation_is_deterministic_across_calls() {
    let g = graph(json!({
        "nodes": [
            trades_source(),
            {"id": "f", "type": "formula", "data": {"config": {
                "expression": "ROUND([price] * [quantity], 2)",
                "output_column": "notional"}}},
            {"id": "u", "type": "unique", "data": {"config": {}}},
            {"id": "out", "type": "chart_output", "data": {"config": {"max_rows": 100}}}
        ],
        "edges": [
            {"source": "src", "target": "f"},
            {"source": "f", "target": "u"},
            {"source": "u", "target": "out"}
        ]
    }));

    let first = compiler().compile(&g).expect("compiles");
    let second = compiler().compile(&g).expect("compiles");
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.sql, b.sql);
        assert_eq!(a.limit, b.limit);
    }
    assert!(first[0].sql.contains("DISTINCT"));
    assert!(first[0].sql.ends_with("LIMIT 100"));
}

/// The subgraph path compiles only the target's ancestry.
#[test]
fn subgraph_compile_ignores_side_branches() {
    let g = graph(json!({
        "nodes": [
            trades_source(),
            {"id": "flt", "type": "filter", "data": {"config": {
                "column": "symbol", "operator": "=", "value": "MSFT"}}},
            {"id": "side", "type": "data_source", "data": {"config": {
                "table": "noise", "columns": [{"name": "x", "dtype": "string"}]}}},
            {"id": "side_out", "type": "table_output", "data": {"config": {}}},
            {"id": "out", "type": "table_output", "data": {"config": {}}}
        ],
        "edges": [
            {"source": "src", "target": "flt"},
            {"source": "flt", "target": "out"},
            {"source": "side", "target": "side_out"}
        ]
    }));

    let plans = compiler().compile_subgraph(&g, "flt").expect("compiles");
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].source_node_ids, vec!["src", "flt"]);
}

/// Tenant id always separates fingerprints; UI-only churn never does.
#[test]
fn fingerprints_isolate_tenants_and_ignore_ui_state() {
    let g = graph(json!({
        "nodes": [trades_source(), {"id": "out", "type": "table_output", "data": {"config": {}}}],
        "edges": [{"source": "src", "target": "out"}]
    }));

    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let base = FingerprintInput {
        tenant_id:        tenant_a,
        target_node_id:   "out",
        graph:            &g,
        config_overrides: None,
        filter_params:    None,
        offset:           0,
        limit:            100,
    };

    let fp_a = fingerprint(&base);
    let fp_b = fingerprint(&FingerprintInput {
        tenant_id: tenant_b,
        ..base.clone()
    });
    assert_ne!(fp_a, fp_b, "identical graphs for different tenants never share a key");

    let mut dragged = g.clone();
    if let Some(node) = dragged.node_mut("src") {
        node.ui.insert("position".to_string(), json!({"x": 640, "y": 480}));
        node.ui.insert("dragging".to_string(), json!(true));
    }
    let fp_dragged = fingerprint(&FingerprintInput {
        graph: &dragged,
        ..base
    });
    assert_eq!(fp_a, fp_dragged, "canvas drags must not bust the cache");
}

/// Fingerprints differ iff (offset, limit) differ, for a fixed graph.
#[test]
fn fingerprints_track_paging_exactly() {
    let g = graph(json!({
        "nodes": [trades_source(), {"id": "out", "type": "table_output", "data": {"config": {}}}],
        "edges": [{"source": "src", "target": "out"}]
    }));
    let tenant = Uuid::new_v4();

    let fp = |offset: u64, limit: u64| {
        fingerprint(&FingerprintInput {
            tenant_id: tenant,
            target_node_id: "out",
            graph: &g,
            config_overrides: None,
            filter_params: None,
            offset,
            limit,
        })
    };

    let pairs = [(0, 100), (0, 50), (100, 100), (50, 50)];
    for (i, a) in pairs.iter().enumerate() {
        for (j, b) in pairs.iter().enumerate() {
            if i == j {
                assert_eq!(fp(a.0, a.1), fp(b.0, b.1));
            } else {
                assert_ne!(fp(a.0, a.1), fp(b.0, b.1), "pairs {a:?} and {b:?} must differ");
            }
        }
    }
}

/// Export/import: fresh ids, isomorphic topology, edges re-pointed.
#[test]
fn remap_ids_preserves_structure_for_import() {
    let g = graph(json!({
        "nodes": [
            trades_source(),
            {"id": "flt", "type": "filter", "data": {"config": {
                "column": "symbol", "operator": "=", "value": "AAPL"}}},
            {"id": "out", "type": "table_output", "data": {"config": {}}}
        ],
        "edges": [
            {"source": "src", "target": "flt"},
            {"source": "flt", "target": "out"}
        ]
    }));

    let imported = g.remap_ids();
    assert_eq!(imported.nodes.len(), 3);
    assert_eq!(imported.edges.len(), 2);
    for node in &imported.nodes {
        assert!(g.node(&node.id).is_none(), "every id is freshly assigned");
    }
    // The imported graph still compiles to the same SQL (ids do not leak
    // into statements).
    let original_sql = &compiler().compile(&g).expect("compiles")[0].sql;
    let imported_sql = &compiler().compile(&imported).expect("compiles")[0].sql;
    assert_eq!(original_sql, imported_sql);
}

/// Widget overrides land in the fingerprint through the overlay path.
#[test]
fn config_overrides_change_fingerprint() {
    let g = graph(json!({
        "nodes": [trades_source(), {"id": "out", "type": "chart_output", "data": {"config": {"chart_type": "bar"}}}],
        "edges": [{"source": "src", "target": "out"}]
    }));
    let tenant = Uuid::new_v4();

    let mut overrides = Map::new();
    overrides.insert("chart_type".to_string(), json!("line"));

    let without = fingerprint(&FingerprintInput {
        tenant_id:        tenant,
        target_node_id:   "out",
        graph:            &g,
        config_overrides: None,
        filter_params:    None,
        offset:           0,
        limit:            1000,
    });
    let with = fingerprint(&FingerprintInput {
        tenant_id:        tenant,
        target_node_id:   "out",
        graph:            &g,
        config_overrides: Some(&overrides),
        filter_params:    None,
        offset:           0,
        limit:            1000,
    });
    assert_ne!(without, with);
}
