//! Per-node SQL builder fold.
//!
//! Each non-terminal node produces a builder state: an open SELECT plus its
//! lineage metadata. Operators merge into the open statement when the
//! statement can still absorb them; otherwise the statement is wrapped as a
//! subquery and the operator applies on top. Join and union consume two
//! upstream states and fold them into one.

use std::collections::HashMap;

use serde_json::{Map, Value};

use lattice_error::CompileError;

use crate::formula::FormulaExpr;
use crate::graph::{ColumnSchema, Node, NodeKind, WorkflowGraph};
use crate::schema::SchemaMap;
use crate::sql::{
    FromSource, JoinKind, OrderKey, Projection, SelectItem, SelectQuery, SqlExpr,
};

use super::filters;
use super::{Freshness, SegmentPlan, DEFAULT_HARD_CAP};

type Config = Map<String, Value>;

/// The open statement for one lineage.
#[derive(Debug, Clone)]
struct BuilderState {
    query:      SelectQuery,
    freshness:  Freshness,
    node_ids:   Vec<String>,
    /// Exact lookup keys; `Some` marks a point-lookup lineage, which
    /// accepts no relational operators.
    point_keys: Option<Vec<String>>,
}

impl BuilderState {
    fn has_group(&self) -> bool {
        !self.query.group_by.is_empty()
    }

    fn has_limit(&self) -> bool {
        self.query.limit.is_some()
    }

    /// Wrap the open statement as a subquery so further operators apply to
    /// its result rather than extending it.
    fn wrapped(self) -> Self {
        Self {
            query:      SelectQuery {
                projection: Projection::Star,
                from: FromSource::Subquery {
                    query: Box::new(self.query),
                    alias: "_sq".to_string(),
                },
                ..SelectQuery::default()
            },
            freshness:  self.freshness,
            node_ids:   self.node_ids,
            point_keys: self.point_keys,
        }
    }
}

/// Monotonic parameter-name source, shared across one compile run so every
/// placeholder in a statement is unique.
#[derive(Debug, Default)]
pub(super) struct ParamNames {
    next: usize,
}

impl ParamNames {
    pub(super) fn next(&mut self) -> String {
        let name = format!("p{}", self.next);
        self.next += 1;
        name
    }
}

/// Fold the topologically-ordered graph into segment plans.
pub(super) fn build_and_merge(
    graph: &WorkflowGraph,
    schemas: &SchemaMap,
) -> Result<Vec<SegmentPlan>, CompileError> {
    let order = topological_order(graph)?;
    let mut params = ParamNames::default();
    let mut artifacts: HashMap<String, Option<BuilderState>> = HashMap::new();

    for node_id in &order {
        let node = graph
            .node(node_id)
            .ok_or_else(|| CompileError::cycle(format!("node '{node_id}' vanished mid-walk")))?;
        let kind = node
            .kind()
            .ok_or_else(|| CompileError::unknown_node_type(&node.node_type))?;

        let artifact = if kind.is_output() {
            None
        } else {
            build_node(graph, schemas, node, kind, &artifacts, &mut params)?
        };
        artifacts.insert(node_id.clone(), artifact);
    }

    // A segment head is a node whose statement leaves the fold: it feeds a
    // terminal output, or nothing consumes it (preview targets).
    let mut caps: HashMap<&str, u64> = HashMap::new();
    let mut heads: Vec<&str> = Vec::new();
    let consumed: HashMap<&str, bool> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.edges.iter().any(|e| e.source == n.id)))
        .collect();

    for node in &graph.nodes {
        let Some(kind) = node.kind() else { continue };
        if !kind.is_output() {
            continue;
        }
        let max_rows = node
            .config()
            .get("max_rows")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HARD_CAP);
        for upstream in graph.inputs_of(&node.id) {
            if matches!(artifacts.get(upstream), Some(Some(_))) {
                caps.entry(upstream)
                    .and_modify(|cap| *cap = (*cap).min(max_rows))
                    .or_insert(max_rows);
            }
        }
    }

    for node_id in &order {
        let is_head = caps.contains_key(node_id.as_str())
            || (!consumed.get(node_id.as_str()).copied().unwrap_or(false)
                && matches!(artifacts.get(node_id), Some(Some(_))));
        if is_head && !heads.contains(&node_id.as_str()) {
            heads.push(node_id);
        }
    }

    let plans = heads
        .into_iter()
        .filter_map(|head| {
            let state = artifacts.get(head).cloned().flatten()?;
            let offset = state.query.offset;
            Some(SegmentPlan {
                target: state.freshness.target(),
                query: if state.point_keys.is_some() {
                    None
                } else {
                    Some(state.query)
                },
                source_node_ids: state.node_ids,
                point_keys: state.point_keys.unwrap_or_default(),
                limit: caps.get(head).copied(),
                offset,
            })
        })
        .collect();

    Ok(plans)
}

fn topological_order(graph: &WorkflowGraph) -> Result<Vec<String>, CompileError> {
    let mut in_degree: HashMap<&str, usize> =
        graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
            *deg += 1;
        }
    }

    let mut queue: std::collections::VecDeque<&str> = graph
        .nodes
        .iter()
        .filter(|n| in_degree.get(n.id.as_str()) == Some(&0))
        .map(|n| n.id.as_str())
        .collect();
    let mut order = Vec::with_capacity(graph.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_string());
        for edge in graph.edges.iter().filter(|e| e.source == node_id) {
            if let Some(deg) = in_degree.get_mut(edge.target.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        return Err(CompileError::cycle("workflow contains a cycle"));
    }
    Ok(order)
}

fn build_node(
    graph: &WorkflowGraph,
    schemas: &SchemaMap,
    node: &Node,
    kind: NodeKind,
    artifacts: &HashMap<String, Option<BuilderState>>,
    params: &mut ParamNames,
) -> Result<Option<BuilderState>, CompileError> {
    let config = node.config();
    let inputs = graph.inputs_of(&node.id);

    if kind == NodeKind::DataSource {
        return Ok(Some(data_source_state(node, &config)));
    }

    // Operators need at least one compiled upstream statement; a dangling
    // operator contributes nothing (matching an empty canvas edit state).
    let first_input = inputs
        .first()
        .and_then(|id| artifacts.get(*id))
        .cloned()
        .flatten();
    let Some(state) = first_input else {
        return Ok(None);
    };

    if state.point_keys.is_some() {
        return Err(CompileError::unsupported(format!(
            "operator '{}' cannot be applied to a point-lookup lineage",
            node.node_type
        )));
    }

    let input_schema = inputs
        .first()
        .and_then(|id| schemas.get(*id))
        .cloned()
        .unwrap_or_default();

    let mut state = match kind {
        NodeKind::Filter => apply_filter(state, &config, &input_schema, params)?,
        NodeKind::Select => apply_select(state, &config, &input_schema),
        NodeKind::Rename => apply_rename(state, &config, &input_schema),
        NodeKind::Sort => apply_sort(state, &config),
        NodeKind::Sample => apply_sample(state, &config),
        NodeKind::Limit => apply_limit(state, &config),
        NodeKind::Unique => apply_unique(state),
        NodeKind::GroupBy => apply_group_by(state, &config),
        NodeKind::Pivot => apply_pivot(state, &config),
        NodeKind::Formula => apply_formula(state, &config, &input_schema)?,
        NodeKind::Window => apply_window(state, &config, &input_schema),
        NodeKind::Join => {
            let right = inputs
                .get(1)
                .and_then(|id| artifacts.get(*id))
                .cloned()
                .flatten();
            let Some(right) = right else {
                return Ok(None);
            };
            apply_join(state, right, node, &config, schemas, &inputs)?
        },
        NodeKind::Union => {
            let right = inputs
                .get(1)
                .and_then(|id| artifacts.get(*id))
                .cloned()
                .flatten();
            let Some(right) = right else {
                return Ok(None);
            };
            apply_union(state, right, schemas, &inputs)?
        },
        NodeKind::DataSource
        | NodeKind::ChartOutput
        | NodeKind::TableOutput
        | NodeKind::KpiOutput => unreachable!("handled above"),
    };

    state.node_ids.push(node.id.clone());
    Ok(Some(state))
}

fn data_source_state(node: &Node, config: &Config) -> BuilderState {
    let freshness = Freshness::parse(config.get("freshness").and_then(Value::as_str));
    let table = config
        .get("table")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let point_keys = (freshness == Freshness::Point).then(|| {
        config
            .get("keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    });

    BuilderState {
        query: SelectQuery {
            projection: Projection::Star,
            from: FromSource::Table(table),
            ..SelectQuery::default()
        },
        freshness,
        node_ids: vec![node.id.clone()],
        point_keys,
    }
}

fn apply_filter(
    state: BuilderState,
    config: &Config,
    input_schema: &[ColumnSchema],
    params: &mut ParamNames,
) -> Result<BuilderState, CompileError> {
    // WHERE applies before grouping and deduplication; a predicate on their
    // result needs the statement closed first.
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };
    if let Some(predicate) = filters::lower_filter(config, input_schema, params)? {
        state.query.filters.push(predicate);
    }
    Ok(state)
}

fn apply_select(state: BuilderState, config: &Config, input_schema: &[ColumnSchema]) -> BuilderState {
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };
    // Unknown names are silently dropped, mirroring the schema transform:
    // the emitted column list must match the computed output schema or the
    // store rejects the statement.
    let columns: Vec<String> = string_list(config, "columns")
        .into_iter()
        .filter(|name| input_schema.iter().any(|c| &c.name == name))
        .collect();
    if columns.is_empty() {
        // An unconfigured (or fully unresolved) select keeps the full
        // projection.
        return state;
    }
    state.query.projection =
        Projection::Items(columns.into_iter().map(SelectItem::column).collect());
    state
}

fn apply_rename(state: BuilderState, config: &Config, input_schema: &[ColumnSchema]) -> BuilderState {
    // Renaming re-aliases the projection; anything beyond a plain column
    // list (aggregates, computed expressions) is closed off first.
    let mut state = if matches!(state.query.projection, Projection::Star) {
        state
    } else {
        state.wrapped()
    };
    let mapping = config.get("rename_map").and_then(Value::as_object);
    let items: Vec<SelectItem> = input_schema
        .iter()
        .map(|col| {
            let renamed = mapping
                .and_then(|m| m.get(&col.name))
                .and_then(Value::as_str);
            match renamed {
                Some(alias) if alias != col.name => {
                    SelectItem::aliased(SqlExpr::col(&col.name), alias)
                },
                _ => SelectItem::column(&col.name),
            }
        })
        .collect();
    if items.is_empty() {
        // No declared input schema to re-alias; keep the full projection.
        return state;
    }
    state.query.projection = Projection::Items(items);
    state
}

fn apply_sort(state: BuilderState, config: &Config) -> BuilderState {
    let mut state = if state.has_limit() { state.wrapped() } else { state };
    state.query.order_by = sort_keys(config);
    state
}

fn apply_sample(state: BuilderState, config: &Config) -> BuilderState {
    // Random-order LIMIT is the portable rendition of row sampling.
    let mut state = if state.has_limit() || !state.query.order_by.is_empty() {
        state.wrapped()
    } else {
        state
    };
    let rows = config.get("rows").and_then(Value::as_u64).unwrap_or(1_000);
    state.query.order_by = vec![OrderKey {
        expr:       SqlExpr::Func {
            name: "RAND".to_string(),
            args: vec![],
        },
        descending: false,
    }];
    state.query.limit = Some(rows);
    state
}

fn apply_limit(state: BuilderState, config: &Config) -> BuilderState {
    let mut state = if state.has_limit() { state.wrapped() } else { state };
    state.query.limit = config.get("limit").and_then(Value::as_u64).or(Some(DEFAULT_HARD_CAP));
    state.query.offset = config.get("offset").and_then(Value::as_u64);
    state
}

fn apply_unique(state: BuilderState) -> BuilderState {
    let mut state = if state.has_limit() { state.wrapped() } else { state };
    state.query.distinct = true;
    state
}

fn apply_group_by(state: BuilderState, config: &Config) -> BuilderState {
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };

    let keys = string_list(config, "group_columns");
    let mut items: Vec<SelectItem> = keys.iter().map(SelectItem::column).collect();

    for agg in config.get("aggregations").and_then(Value::as_array).into_iter().flatten() {
        let function = agg
            .get("function")
            .and_then(Value::as_str)
            .unwrap_or("COUNT")
            .to_uppercase();
        let column = agg.get("column").and_then(Value::as_str).unwrap_or("");
        let alias = agg
            .get("alias")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{}_{column}", function.to_lowercase()), str::to_string);
        items.push(SelectItem::aliased(aggregate_expr(&function, column), alias));
    }

    state.query.projection = Projection::Items(items);
    state.query.group_by = keys.into_iter().map(SqlExpr::col).collect();
    // Pre-aggregation ordering is meaningless for the grouped result.
    state.query.order_by.clear();
    state
}

fn apply_pivot(state: BuilderState, config: &Config) -> BuilderState {
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };

    let keys = string_list(config, "row_columns");
    let value_column = config.get("value_column").and_then(Value::as_str).unwrap_or_default();
    let aggregation = config
        .get("aggregation")
        .and_then(Value::as_str)
        .unwrap_or("SUM")
        .to_uppercase();

    let mut items: Vec<SelectItem> = keys.iter().map(SelectItem::column).collect();
    if !value_column.is_empty() {
        items.push(SelectItem::aliased(
            aggregate_expr(&aggregation, value_column),
            format!("{value_column}_{}", aggregation.to_lowercase()),
        ));
    }

    state.query.projection = Projection::Items(items);
    state.query.group_by = keys.into_iter().map(SqlExpr::col).collect();
    state.query.order_by.clear();
    state
}

fn apply_formula(
    state: BuilderState,
    config: &Config,
    input_schema: &[ColumnSchema],
) -> Result<BuilderState, CompileError> {
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };

    let expression = config.get("expression").and_then(Value::as_str).unwrap_or_default();
    let parsed = FormulaExpr::parse(expression)?;
    parsed.validate(input_schema)?;

    let alias = config
        .get("output_column")
        .and_then(Value::as_str)
        .unwrap_or("calculated");

    materialize_star(&mut state, input_schema);
    if let Projection::Items(items) = &mut state.query.projection {
        items.push(SelectItem::aliased(parsed.lower(), alias));
    }
    Ok(state)
}

fn apply_window(state: BuilderState, config: &Config, input_schema: &[ColumnSchema]) -> BuilderState {
    let mut state = if state.has_group() || state.query.distinct || state.has_limit() {
        state.wrapped()
    } else {
        state
    };

    let function = config
        .get("function")
        .and_then(Value::as_str)
        .unwrap_or("ROW_NUMBER")
        .to_uppercase();
    let source = config.get("source_column").and_then(Value::as_str).unwrap_or_default();
    let alias = config
        .get("output_column")
        .and_then(Value::as_str)
        .unwrap_or("window_result");

    let expr = SqlExpr::WindowFunc {
        name:         function,
        args:         if source.is_empty() {
            vec![]
        } else {
            vec![SqlExpr::col(source)]
        },
        partition_by: string_list(config, "partition_columns")
            .into_iter()
            .map(SqlExpr::col)
            .collect(),
        order_by:     sort_keys(config),
    };

    // The window column rides alongside the existing projection.
    materialize_star(&mut state, input_schema);
    if let Projection::Items(items) = &mut state.query.projection {
        items.push(SelectItem::aliased(expr, alias));
    }
    state
}

fn apply_join(
    left: BuilderState,
    right: BuilderState,
    node: &Node,
    config: &Config,
    schemas: &SchemaMap,
    inputs: &[&str],
) -> Result<BuilderState, CompileError> {
    if right.point_keys.is_some() {
        return Err(CompileError::unsupported(
            "join cannot be applied to a point-lookup lineage",
        ));
    }

    let kind = config
        .get("join_type")
        .and_then(Value::as_str)
        .and_then(JoinKind::parse)
        .unwrap_or(JoinKind::Inner);
    let left_key = config.get("left_key").and_then(Value::as_str).unwrap_or_default();
    let right_key = config.get("right_key").and_then(Value::as_str).unwrap_or_default();
    if left_key.is_empty() || right_key.is_empty() {
        return Err(CompileError::schema_mismatch(format!(
            "join '{}' is missing its key columns",
            node.id
        )));
    }

    let left_schema = inputs
        .first()
        .and_then(|id| schemas.get(*id))
        .cloned()
        .unwrap_or_default();
    if !left_schema.iter().any(|c| c.name == left_key) {
        return Err(CompileError::unknown_column(left_key));
    }
    let right_schema = inputs
        .get(1)
        .and_then(|id| schemas.get(*id))
        .cloned()
        .unwrap_or_default();
    if !right_schema.iter().any(|c| c.name == right_key) {
        return Err(CompileError::unknown_column(right_key));
    }

    // Projection follows the join transform: left columns, then right
    // columns whose names do not collide, all explicitly qualified.
    let mut items: Vec<SelectItem> = left_schema
        .iter()
        .map(|col| {
            SelectItem::aliased(
                SqlExpr::Qualified {
                    table:  "_left".to_string(),
                    column: col.name.clone(),
                },
                col.name.clone(),
            )
        })
        .collect();
    for col in &right_schema {
        if !left_schema.iter().any(|c| c.name == col.name) {
            items.push(SelectItem::aliased(
                SqlExpr::Qualified {
                    table:  "_right".to_string(),
                    column: col.name.clone(),
                },
                col.name.clone(),
            ));
        }
    }

    let mut node_ids = left.node_ids.clone();
    node_ids.extend(right.node_ids.iter().cloned());

    Ok(BuilderState {
        query:      SelectQuery {
            projection: Projection::Items(items),
            from: FromSource::Join {
                left:  Box::new(left.query),
                right: Box::new(right.query),
                kind,
                on: vec![(left_key.to_string(), right_key.to_string())],
            },
            ..SelectQuery::default()
        },
        freshness:  left.freshness.combine(right.freshness),
        node_ids,
        point_keys: None,
    })
}

fn apply_union(
    left: BuilderState,
    right: BuilderState,
    schemas: &SchemaMap,
    inputs: &[&str],
) -> Result<BuilderState, CompileError> {
    if right.point_keys.is_some() {
        return Err(CompileError::unsupported(
            "union cannot be applied to a point-lookup lineage",
        ));
    }

    // Strict compatibility: identical column count and positional dtypes.
    let left_schema = inputs
        .first()
        .and_then(|id| schemas.get(*id))
        .cloned()
        .unwrap_or_default();
    let right_schema = inputs
        .get(1)
        .and_then(|id| schemas.get(*id))
        .cloned()
        .unwrap_or_default();
    if left_schema.len() != right_schema.len() {
        return Err(CompileError::schema_mismatch(format!(
            "union inputs have {} and {} columns",
            left_schema.len(),
            right_schema.len()
        )));
    }
    for (l, r) in left_schema.iter().zip(&right_schema) {
        if l.dtype != r.dtype {
            return Err(CompileError::schema_mismatch(format!(
                "union column '{}' is {} on one side and {} on the other",
                l.name,
                l.dtype.as_str(),
                r.dtype.as_str()
            )));
        }
    }

    let mut node_ids = left.node_ids.clone();
    node_ids.extend(right.node_ids.iter().cloned());

    Ok(BuilderState {
        query:      SelectQuery {
            projection: Projection::Star,
            from: FromSource::UnionAll {
                left:  Box::new(left.query),
                right: Box::new(right.query),
            },
            ..SelectQuery::default()
        },
        freshness:  left.freshness.combine(right.freshness),
        node_ids,
        point_keys: None,
    })
}

fn aggregate_expr(function: &str, column: &str) -> SqlExpr {
    let args = if column.is_empty() {
        vec![SqlExpr::Literal(crate::sql::SqlLiteral::Int(1))]
    } else {
        vec![SqlExpr::col(column)]
    };
    SqlExpr::Func {
        name: function.to_string(),
        args,
    }
}

fn materialize_star(state: &mut BuilderState, input_schema: &[ColumnSchema]) {
    if matches!(state.query.projection, Projection::Star) {
        state.query.projection = Projection::Items(
            input_schema.iter().map(|col| SelectItem::column(&col.name)).collect(),
        );
    }
}

fn sort_keys(config: &Config) -> Vec<OrderKey> {
    config
        .get("sort_by")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(|key| {
                    let column = key.get("column")?.as_str()?;
                    let descending = key
                        .get("direction")
                        .and_then(Value::as_str)
                        .is_some_and(|d| d.eq_ignore_ascii_case("desc"));
                    Some(OrderKey {
                        expr: SqlExpr::col(column),
                        descending,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(config: &Config, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
