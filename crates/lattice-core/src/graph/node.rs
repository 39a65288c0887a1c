//! Node and edge wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of node types.
///
/// Every kind has a schema-transform contract (see [`crate::schema`]) and a
/// SQL-emission contract (see [`crate::compile`]). Dispatch over this enum
/// is always an exhaustive `match`, so adding a kind without wiring both
/// contracts fails to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Source table in a backing store; schema comes from its config.
    DataSource,
    /// Row predicate.
    Filter,
    /// Column subset/reorder.
    Select,
    /// Column renaming.
    Rename,
    /// Row ordering.
    Sort,
    /// Random row sample.
    Sample,
    /// Row cap with optional offset.
    Limit,
    /// Row deduplication.
    Unique,
    /// Two-input join on declared keys.
    Join,
    /// Keyed aggregation.
    GroupBy,
    /// Row-key/value-column pivot.
    Pivot,
    /// Calculated column from a formula expression.
    Formula,
    /// Window function column.
    Window,
    /// Two-input UNION ALL.
    Union,
    /// Terminal sink rendered as a chart.
    ChartOutput,
    /// Terminal sink rendered as a table.
    TableOutput,
    /// Terminal sink rendered as a KPI tile.
    KpiOutput,
}

impl NodeKind {
    /// Parse the wire name of a node type. Returns `None` for anything
    /// outside the closed set.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(Value::String(raw.to_string())).ok()
    }

    /// Whether this kind is a terminal sink (no output schema, defines the
    /// `max_rows` cap of its upstream segment).
    #[must_use]
    pub const fn is_output(self) -> bool {
        matches!(self, Self::ChartOutput | Self::TableOutput | Self::KpiOutput)
    }
}

/// A workflow node as the frontend sends it.
///
/// `data` carries the engine-relevant `config` object; any other fields in
/// `data`, and any top-level fields beyond `id`/`type` (canvas position,
/// selection, drag state, …), are UI-only. They survive round-trips but are
/// stripped before fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Frontend-assigned node id, unique within the graph.
    pub id:        String,
    /// Wire name of the node type.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node payload; `data.config` is the engine-relevant part.
    #[serde(default)]
    pub data:      Value,
    /// UI-only top-level fields, preserved on round-trip.
    #[serde(flatten)]
    pub ui:        Map<String, Value>,
}

impl Node {
    /// The parsed node kind, if the raw type is in the closed set.
    #[must_use]
    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::parse(&self.node_type)
    }

    /// The node's `data.config` object (empty object when absent).
    #[must_use]
    pub fn config(&self) -> Map<String, Value> {
        self.data
            .get("config")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Overlay `overrides` onto `data.config`, creating the path if needed.
    ///
    /// Widgets never own a query; they compose one by overlaying their
    /// `config_overrides` onto the source node before compilation.
    pub fn apply_config_overrides(&mut self, overrides: &Map<String, Value>) {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        let data = self.data.as_object_mut().expect("data was just made an object");
        let config = data
            .entry("config".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !config.is_object() {
            *config = Value::Object(Map::new());
        }
        let config = config.as_object_mut().expect("config was just made an object");
        for (key, value) in overrides {
            config.insert(key.clone(), value.clone());
        }
    }
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node id.
    pub source: String,
    /// Downstream node id.
    pub target: String,
    /// UI-only fields (edge ids, handles), preserved on round-trip.
    #[serde(flatten)]
    pub ui:     Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_parse_round_trip() {
        assert_eq!(NodeKind::parse("data_source"), Some(NodeKind::DataSource));
        assert_eq!(NodeKind::parse("group_by"), Some(NodeKind::GroupBy));
        assert_eq!(NodeKind::parse("kpi_output"), Some(NodeKind::KpiOutput));
        assert_eq!(NodeKind::parse("teleport"), None);
    }

    #[test]
    fn test_output_kinds() {
        assert!(NodeKind::TableOutput.is_output());
        assert!(NodeKind::ChartOutput.is_output());
        assert!(!NodeKind::Filter.is_output());
    }

    #[test]
    fn test_config_extraction() {
        let node: Node = serde_json::from_value(json!({
            "id": "f1",
            "type": "filter",
            "data": {"config": {"column": "symbol", "operator": "=", "value": "AAPL"}, "label": "Filter"}
        }))
        .expect("valid node");
        assert_eq!(node.config().get("column"), Some(&json!("symbol")));
    }

    #[test]
    fn test_apply_overrides_creates_config_path() {
        let mut node: Node = serde_json::from_value(json!({"id": "o", "type": "chart_output"}))
            .expect("valid node");
        let mut overrides = Map::new();
        overrides.insert("chart_type".to_string(), json!("line"));
        node.apply_config_overrides(&overrides);
        assert_eq!(node.config().get("chart_type"), Some(&json!("line")));
    }

    #[test]
    fn test_apply_overrides_replaces_existing_keys() {
        let mut node: Node = serde_json::from_value(json!({
            "id": "o", "type": "chart_output",
            "data": {"config": {"chart_type": "bar", "max_rows": 500}}
        }))
        .expect("valid node");
        let mut overrides = Map::new();
        overrides.insert("chart_type".to_string(), json!("area"));
        node.apply_config_overrides(&overrides);
        let config = node.config();
        assert_eq!(config.get("chart_type"), Some(&json!("area")));
        assert_eq!(config.get("max_rows"), Some(&json!(500)));
    }
}
