//! Schema engine: propagates column schemas through the workflow DAG.
//!
//! Every node kind has a pure transform `(config, input_schemas) ->
//! output_schema`. Propagation walks the DAG in topological order (Kahn),
//! gathering input schemas from in-neighbours in edge order; a traversal
//! that visits fewer nodes than exist means a cycle.
//!
//! Determinism matters here: for a fixed `(nodes, edges)` the result is a
//! pure function, independent of node input order. Cache fingerprints rely
//! on that.

mod catalog;
mod transforms;

pub use catalog::{dtype_from_native, CatalogService, CatalogTable, SchemaCatalog, StoreName};

use std::collections::{BTreeMap, HashMap, VecDeque};

use lattice_error::{CompileError, CompileErrorKind};

use crate::graph::{ColumnSchema, WorkflowGraph};

/// Map of node id to its computed output schema.
pub type SchemaMap = BTreeMap<String, Vec<ColumnSchema>>;

/// Validates a workflow DAG and computes per-node output schemas.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaEngine;

impl SchemaEngine {
    /// Create a schema engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Walk the DAG in topological order, computing output schemas.
    ///
    /// # Errors
    ///
    /// - [`CompileErrorKind::UnknownNodeType`] for a node type outside the
    ///   closed set.
    /// - [`CompileErrorKind::Cycle`] when traversal cannot visit every node.
    pub fn propagate(&self, graph: &WorkflowGraph) -> Result<SchemaMap, CompileError> {
        let mut in_degree: HashMap<&str, usize> =
            graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> =
            graph.nodes.iter().map(|n| (n.id.as_str(), Vec::new())).collect();

        for edge in &graph.edges {
            if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                *deg += 1;
            }
            if let Some(next) = adjacency.get_mut(edge.source.as_str()) {
                next.push(edge.target.as_str());
            }
        }

        // Seed in node-list order so traversal (and any tie-breaks) are
        // deterministic for a fixed graph.
        let mut queue: VecDeque<&str> = graph
            .nodes
            .iter()
            .filter(|n| in_degree.get(n.id.as_str()) == Some(&0))
            .map(|n| n.id.as_str())
            .collect();

        let mut schemas = SchemaMap::new();
        let mut visited = 0usize;

        while let Some(node_id) = queue.pop_front() {
            visited += 1;
            let node = graph
                .node(node_id)
                .ok_or_else(|| CompileError::cycle(format!("node '{node_id}' vanished mid-walk")))?;
            let kind = node
                .kind()
                .ok_or_else(|| CompileError::unknown_node_type(&node.node_type))?;

            // Input schemas in the order the in-edges appear.
            let inputs: Vec<Vec<ColumnSchema>> = graph
                .inputs_of(node_id)
                .iter()
                .map(|src| schemas.get(*src).cloned().unwrap_or_default())
                .collect();

            let output = transforms::apply(kind, &node.config(), &inputs);
            schemas.insert(node_id.to_string(), output);

            for next in adjacency.get(node_id).into_iter().flatten() {
                let deg = in_degree
                    .get_mut(next)
                    .ok_or_else(|| CompileError::cycle(format!("edge into unknown node '{next}'")))?;
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited != graph.nodes.len() {
            return Err(CompileError::new(
                CompileErrorKind::Cycle,
                "workflow contains a cycle",
            ));
        }

        Ok(schemas)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graph::Dtype;

    fn graph(value: serde_json::Value) -> WorkflowGraph {
        serde_json::from_value(value).expect("valid graph json")
    }

    fn source_node(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "data_source",
            "data": {"config": {"table": "trades", "columns": [
                {"name": "symbol", "dtype": "string"},
                {"name": "price", "dtype": "float64"},
                {"name": "quantity", "dtype": "int64"}
            ]}}
        })
    }

    #[test]
    fn test_propagate_passthrough_chain() {
        let g = graph(json!({
            "nodes": [
                source_node("src"),
                {"id": "f", "type": "filter", "data": {"config": {"column": "symbol"}}},
                {"id": "s", "type": "sort", "data": {"config": {"sort_keys": []}}},
                {"id": "out", "type": "table_output", "data": {}}
            ],
            "edges": [
                {"source": "src", "target": "f"},
                {"source": "f", "target": "s"},
                {"source": "s", "target": "out"}
            ]
        }));
        let schemas = SchemaEngine::new().propagate(&g).expect("propagates");
        assert_eq!(schemas.len(), 4);
        assert_eq!(schemas["f"], schemas["src"]);
        assert_eq!(schemas["s"], schemas["src"]);
        assert!(schemas["out"].is_empty(), "terminal sinks have no output schema");
    }

    #[test]
    fn test_propagate_rejects_cycle() {
        let g = graph(json!({
            "nodes": [
                {"id": "a", "type": "filter", "data": {}},
                {"id": "b", "type": "filter", "data": {}}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }));
        let err = SchemaEngine::new().propagate(&g).expect_err("cycle must fail");
        assert_eq!(err.kind, CompileErrorKind::Cycle);
    }

    #[test]
    fn test_propagate_rejects_unknown_type() {
        let g = graph(json!({
            "nodes": [{"id": "a", "type": "teleport", "data": {}}],
            "edges": []
        }));
        let err = SchemaEngine::new().propagate(&g).expect_err("unknown type must fail");
        assert_eq!(err.kind, CompileErrorKind::UnknownNodeType);
    }

    #[test]
    fn test_propagate_stable_under_node_permutation() {
        let nodes = vec![
            source_node("src"),
            json!({"id": "g", "type": "group_by", "data": {"config": {
                "group_columns": ["symbol"],
                "aggregations": [{"column": "quantity", "function": "SUM", "alias": "total_quantity", "output_dtype": "int64"}]
            }}}),
            json!({"id": "out", "type": "table_output", "data": {}}),
        ];
        let edges = json!([
            {"source": "src", "target": "g"},
            {"source": "g", "target": "out"}
        ]);

        let forward = graph(json!({"nodes": nodes, "edges": edges}));
        let reversed = graph(json!({
            "nodes": nodes.iter().rev().collect::<Vec<_>>(),
            "edges": edges
        }));

        let a = SchemaEngine::new().propagate(&forward).expect("propagates");
        let b = SchemaEngine::new().propagate(&reversed).expect("propagates");
        assert_eq!(a, b);
        assert_eq!(a["g"][1].name, "total_quantity");
        assert_eq!(a["g"][1].dtype, Dtype::Int64);
        assert!(a["g"][1].nullable);
    }

    #[test]
    fn test_join_merges_without_collisions() {
        let g = graph(json!({
            "nodes": [
                source_node("left"),
                {"id": "right", "type": "data_source", "data": {"config": {"columns": [
                    {"name": "symbol", "dtype": "string"},
                    {"name": "sector", "dtype": "string"}
                ]}}},
                {"id": "j", "type": "join", "data": {"config": {"join_type": "inner", "left_key": "symbol", "right_key": "symbol"}}}
            ],
            "edges": [
                {"source": "left", "target": "j"},
                {"source": "right", "target": "j"}
            ]
        }));
        let schemas = SchemaEngine::new().propagate(&g).expect("propagates");
        let names: Vec<&str> = schemas["j"].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["symbol", "price", "quantity", "sector"]);
    }
}
