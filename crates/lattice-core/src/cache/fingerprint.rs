//! Content fingerprinting.
//!
//! Cache keys MUST separate tenants and MUST change whenever anything that
//! affects the result changes: the relevant subgraph config, widget
//! overrides, runtime filters, or paging. They must NOT change for UI-only
//! edits (node position, selection, drag state), or every canvas nudge
//! would bust the cache.
//!
//! Canonicalization relies on key-sorted JSON object serialization plus
//! explicit sorting of the node and edge lists; the SHA-256 digest is
//! truncated to a stable 16-hex-char prefix.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::graph::WorkflowGraph;

/// Inputs that identify one cacheable query.
#[derive(Debug, Clone)]
pub struct FingerprintInput<'a> {
    /// Tenant scope; always from the authenticated principal.
    pub tenant_id:        Uuid,
    /// The node whose output is requested.
    pub target_node_id:   &'a str,
    /// The full graph; restricted to `ancestors(target) ∪ {target}` here.
    pub graph:            &'a WorkflowGraph,
    /// Widget config overrides (widget path only).
    pub config_overrides: Option<&'a Map<String, Value>>,
    /// Runtime filters (widget path only).
    pub filter_params:    Option<&'a Map<String, Value>>,
    /// Page offset.
    pub offset:           u64,
    /// Page limit.
    pub limit:            u64,
}

/// Compute the content fingerprint: 16 hex chars of SHA-256 over the
/// canonicalized payload.
#[must_use]
pub fn fingerprint(input: &FingerprintInput<'_>) -> String {
    let sub = input.graph.subgraph(input.target_node_id);

    // Nodes projected to the engine-relevant triple, sorted by id. UI-only
    // fields never reach the payload.
    let mut nodes: Vec<Value> = sub
        .nodes
        .iter()
        .map(|n| {
            json!({
                "id": n.id,
                "type": n.node_type,
                "config": Value::Object(n.config()),
            })
        })
        .collect();
    nodes.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));

    let mut edges: Vec<(String, String)> = sub
        .edges
        .iter()
        .map(|e| (e.source.clone(), e.target.clone()))
        .collect();
    edges.sort();
    let edges: Vec<Value> = edges
        .into_iter()
        .map(|(source, target)| json!({"source": source, "target": target}))
        .collect();

    let payload = json!({
        "tenant_id": input.tenant_id.to_string(),
        "target": input.target_node_id,
        "nodes": nodes,
        "edges": edges,
        "config_overrides": input.config_overrides.cloned().map(Value::Object),
        "filter_params": input.filter_params.cloned().map(Value::Object),
        "offset": input.offset,
        "limit": input.limit,
    });

    let serialized = payload.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)[..16].to_string()
}
