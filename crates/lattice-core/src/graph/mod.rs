//! Workflow graph model.
//!
//! The frontend owns the graph wire format: nodes and edges arrive as JSON
//! with UI-only fields (canvas position, selection, drag state) riding
//! alongside the engine-relevant ones. Parsing is tolerant — unknown fields
//! are preserved on round-trip — and validation happens on ingress, failing
//! fast with the offending path rather than deep inside compilation.

mod node;
mod schema;

pub use node::{Edge, Node, NodeKind};
pub use schema::{ColumnSchema, Dtype};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lattice_error::{CoreError, Result};

/// A directed acyclic workflow graph.
///
/// Acyclicity is not enforced here; the schema engine rejects cycles during
/// propagation. This type only guarantees referential integrity after
/// [`WorkflowGraph::validate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// Workflow nodes in frontend order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Directed edges between node ids.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Parse a graph from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending path for payloads
    /// that are not structurally a graph, reference unknown node types, or
    /// contain dangling edges.
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        let graph: Self = serde_json::from_value(value.clone())?;
        graph.validate()?;
        Ok(graph)
    }

    /// Validate structural integrity: known node types, unique node ids,
    /// edge endpoints that exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` with the path of the first offending
    /// element.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if NodeKind::parse(&node.node_type).is_none() {
                return Err(CoreError::validation_at(
                    format!("unknown node type '{}'", node.node_type),
                    format!("nodes[{i}].type"),
                ));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(CoreError::validation_at(
                    format!("duplicate node id '{}'", node.id),
                    format!("nodes[{i}].id"),
                ));
            }
        }
        for (i, edge) in self.edges.iter().enumerate() {
            if !seen.contains(edge.source.as_str()) {
                return Err(CoreError::validation_at(
                    format!("edge references unknown node '{}'", edge.source),
                    format!("edges[{i}].source"),
                ));
            }
            if !seen.contains(edge.target.as_str()) {
                return Err(CoreError::validation_at(
                    format!("edge references unknown node '{}'", edge.target),
                    format!("edges[{i}].target"),
                ));
            }
        }
        Ok(())
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Mutable lookup by id.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Source node ids of the in-edges of `id`, in edge order.
    #[must_use]
    pub fn inputs_of(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .collect()
    }

    /// All transitive ancestors of `id` (excluding `id` itself).
    #[must_use]
    pub fn ancestors_of(&self, id: &str) -> HashSet<String> {
        let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            parents.entry(edge.target.as_str()).or_default().push(edge.source.as_str());
        }

        let mut ancestors = HashSet::new();
        let mut stack: Vec<&str> = parents.get(id).cloned().unwrap_or_default();
        while let Some(current) = stack.pop() {
            if ancestors.insert(current.to_string()) {
                if let Some(more) = parents.get(current) {
                    stack.extend(more);
                }
            }
        }
        ancestors
    }

    /// Restrict the graph to `ancestors(target) ∪ {target}`.
    ///
    /// Used by the preview and widget-data paths, which execute a single
    /// output node rather than the whole workflow.
    #[must_use]
    pub fn subgraph(&self, target: &str) -> Self {
        let mut keep = self.ancestors_of(target);
        keep.insert(target.to_string());

        Self {
            nodes: self.nodes.iter().filter(|n| keep.contains(&n.id)).cloned().collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
                .cloned()
                .collect(),
        }
    }

    /// Terminal node ids: nodes with no outgoing edges.
    #[must_use]
    pub fn terminals(&self) -> Vec<&str> {
        let sources: HashSet<&str> = self.edges.iter().map(|e| e.source.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !sources.contains(n.id.as_str()))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Re-assign every node id, preserving topology.
    ///
    /// Import uses this so a re-imported workflow never collides with the
    /// export source: node ids and edge endpoints are freshly generated,
    /// and the result is isomorphic to the input.
    #[must_use]
    pub fn remap_ids(&self) -> Self {
        let mapping: HashMap<&str, String> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), format!("n-{}", Uuid::new_v4())))
            .collect();

        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let mut node = n.clone();
                node.id = mapping[n.id.as_str()].clone();
                node
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .filter(|e| mapping.contains_key(e.source.as_str()) && mapping.contains_key(e.target.as_str()))
            .map(|e| {
                let mut edge = e.clone();
                edge.source = mapping[e.source.as_str()].clone();
                edge.target = mapping[e.target.as_str()].clone();
                edge
            })
            .collect();

        Self { nodes, edges }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn two_node_graph() -> serde_json::Value {
        json!({
            "nodes": [
                {"id": "src", "type": "data_source", "position": {"x": 10, "y": 20},
                 "data": {"config": {"table": "trades"}}},
                {"id": "out", "type": "table_output", "selected": true, "data": {"config": {}}}
            ],
            "edges": [{"source": "src", "target": "out"}]
        })
    }

    #[test]
    fn test_parse_preserves_ui_fields() {
        let graph = WorkflowGraph::parse(&two_node_graph()).expect("valid graph");
        let round_trip = serde_json::to_value(&graph).expect("serializable");
        assert_eq!(round_trip["nodes"][0]["position"]["x"], 10);
        assert_eq!(round_trip["nodes"][1]["selected"], true);
    }

    #[test]
    fn test_unknown_node_type_fails_with_path() {
        let payload = json!({
            "nodes": [{"id": "a", "type": "teleport", "data": {}}],
            "edges": []
        });
        let err = WorkflowGraph::parse(&payload).expect_err("must reject");
        assert!(err.to_string().contains("teleport"));
        assert!(matches!(err, CoreError::Validation { path: Some(ref p), .. } if p == "nodes[0].type"));
    }

    #[test]
    fn test_dangling_edge_fails_with_path() {
        let payload = json!({
            "nodes": [{"id": "a", "type": "data_source", "data": {}}],
            "edges": [{"source": "a", "target": "ghost"}]
        });
        let err = WorkflowGraph::parse(&payload).expect_err("must reject");
        assert!(matches!(err, CoreError::Validation { path: Some(ref p), .. } if p == "edges[0].target"));
    }

    #[test]
    fn test_ancestors_and_subgraph() {
        let graph = WorkflowGraph::parse(&json!({
            "nodes": [
                {"id": "a", "type": "data_source", "data": {}},
                {"id": "b", "type": "filter", "data": {}},
                {"id": "c", "type": "table_output", "data": {}},
                {"id": "x", "type": "data_source", "data": {}}
            ],
            "edges": [
                {"source": "a", "target": "b"},
                {"source": "b", "target": "c"}
            ]
        }))
        .expect("valid graph");

        let ancestors = graph.ancestors_of("c");
        assert_eq!(ancestors.len(), 2);
        assert!(ancestors.contains("a") && ancestors.contains("b"));

        let sub = graph.subgraph("b");
        assert_eq!(sub.nodes.len(), 2);
        assert_eq!(sub.edges.len(), 1);
        assert!(sub.node("x").is_none());
    }

    #[test]
    fn test_remap_ids_is_isomorphic() {
        let graph = WorkflowGraph::parse(&two_node_graph()).expect("valid graph");
        let remapped = graph.remap_ids();

        assert_eq!(remapped.nodes.len(), graph.nodes.len());
        assert_eq!(remapped.edges.len(), graph.edges.len());
        // Fresh ids everywhere.
        for node in &remapped.nodes {
            assert!(graph.node(&node.id).is_none());
        }
        // Edges point at the new ids.
        let edge = &remapped.edges[0];
        assert!(remapped.node(&edge.source).is_some());
        assert!(remapped.node(&edge.target).is_some());
        assert_eq!(remapped.node(&edge.source).map(|n| n.node_type.as_str()), Some("data_source"));
    }

    #[test]
    fn test_terminals() {
        let graph = WorkflowGraph::parse(&two_node_graph()).expect("valid graph");
        assert_eq!(graph.terminals(), vec!["out"]);
    }
}
