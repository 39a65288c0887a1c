//! Property tests for fingerprint stability.

use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use lattice_core::cache::{fingerprint, FingerprintInput};
use lattice_core::graph::WorkflowGraph;

fn graph_with_table(table: &str) -> WorkflowGraph {
    WorkflowGraph::parse(&json!({
        "nodes": [
            {"id": "src", "type": "data_source",
             "data": {"config": {"table": table, "columns": [
                 {"name": "symbol", "dtype": "string"}]}}},
            {"id": "out", "type": "table_output", "data": {"config": {}}}
        ],
        "edges": [{"source": "src", "target": "out"}]
    }))
    .expect("valid graph")
}

proptest! {
    /// Fingerprints are a pure function of their inputs.
    #[test]
    fn fingerprint_is_deterministic(
        tenant in any::<u128>(),
        offset in 0u64..1_000_000,
        limit in 1u64..10_000,
    ) {
        let tenant = Uuid::from_u128(tenant);
        let graph = graph_with_table("fct_trades");
        let input = FingerprintInput {
            tenant_id: tenant,
            target_node_id: "out",
            graph: &graph,
            config_overrides: None,
            filter_params: None,
            offset,
            limit,
        };
        prop_assert_eq!(fingerprint(&input), fingerprint(&input));
    }

    /// Distinct tenants never collide for the same graph and paging.
    #[test]
    fn tenants_never_share_fingerprints(
        tenant_a in any::<u128>(),
        tenant_b in any::<u128>(),
        offset in 0u64..1_000,
        limit in 1u64..1_000,
    ) {
        prop_assume!(tenant_a != tenant_b);
        let graph = graph_with_table("fct_trades");
        let fp = |tenant: u128| {
            fingerprint(&FingerprintInput {
                tenant_id: Uuid::from_u128(tenant),
                target_node_id: "out",
                graph: &graph,
                config_overrides: None,
                filter_params: None,
                offset,
                limit,
            })
        };
        prop_assert_ne!(fp(tenant_a), fp(tenant_b));
    }

    /// Node list order is canonicalized away.
    #[test]
    fn node_order_does_not_change_fingerprint(seed in any::<u64>()) {
        let graph = graph_with_table("fct_trades");
        let mut reversed = graph.clone();
        reversed.nodes.reverse();

        let tenant = Uuid::from_u128(u128::from(seed));
        let fp = |g: &WorkflowGraph| {
            fingerprint(&FingerprintInput {
                tenant_id: tenant,
                target_node_id: "out",
                graph: g,
                config_overrides: None,
                filter_params: None,
                offset: 0,
                limit: 100,
            })
        };
        prop_assert_eq!(fp(&graph), fp(&reversed));
    }
}
