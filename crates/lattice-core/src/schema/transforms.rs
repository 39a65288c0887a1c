//! Per-kind schema transforms.
//!
//! Pure functions `(config, input_schemas) -> output_schema`, dispatched
//! through one exhaustive `match` so the compiler enforces that every node
//! kind in the closed set has a transform.

use serde_json::{Map, Value};

use crate::graph::{ColumnSchema, Dtype, NodeKind};

type Config = Map<String, Value>;
type Inputs = [Vec<ColumnSchema>];

/// Apply the transform registered for `kind`.
#[must_use]
pub fn apply(kind: NodeKind, config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    match kind {
        NodeKind::DataSource => data_source(config),
        NodeKind::Filter
        | NodeKind::Sort
        | NodeKind::Sample
        | NodeKind::Limit
        | NodeKind::Unique
        | NodeKind::Union => passthrough(inputs),
        NodeKind::Select => select(config, inputs),
        NodeKind::Rename => rename(config, inputs),
        NodeKind::Join => join(inputs),
        NodeKind::GroupBy => group_by(config, inputs),
        NodeKind::Pivot => pivot(config, inputs),
        NodeKind::Formula => formula(config, inputs),
        NodeKind::Window => window(config, inputs),
        NodeKind::ChartOutput | NodeKind::TableOutput | NodeKind::KpiOutput => Vec::new(),
    }
}

/// Output schema comes from the declared config columns, not from inputs.
fn data_source(config: &Config) -> Vec<ColumnSchema> {
    config
        .get("columns")
        .and_then(Value::as_array)
        .map(|columns| columns.iter().filter_map(parse_column).collect())
        .unwrap_or_default()
}

fn parse_column(value: &Value) -> Option<ColumnSchema> {
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?;
    let dtype = object
        .get("dtype")
        .and_then(Value::as_str)
        .and_then(Dtype::parse)
        .unwrap_or(Dtype::String);
    Some(ColumnSchema {
        name: name.to_string(),
        dtype,
        nullable: object.get("nullable").and_then(Value::as_bool).unwrap_or(false),
        description: object.get("description").and_then(Value::as_str).map(str::to_string),
    })
}

/// Same columns; the operator only changes which rows survive or their order.
fn passthrough(inputs: &Inputs) -> Vec<ColumnSchema> {
    inputs.first().cloned().unwrap_or_default()
}

/// Subset of input columns in config order; unknown names are silently dropped.
fn select(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };
    string_list(config, "columns")
        .iter()
        .filter_map(|name| input.iter().find(|c| &c.name == name).cloned())
        .collect()
}

/// Input columns with names substituted per the config map; dtype preserved.
fn rename(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };
    let mapping = config.get("rename_map").and_then(Value::as_object);
    input
        .iter()
        .map(|col| {
            let renamed = mapping
                .and_then(|m| m.get(&col.name))
                .and_then(Value::as_str)
                .unwrap_or(&col.name);
            ColumnSchema {
                name: renamed.to_string(),
                ..col.clone()
            }
        })
        .collect()
}

/// Left columns followed by right columns whose names do not collide.
fn join(inputs: &Inputs) -> Vec<ColumnSchema> {
    let mut merged = inputs.first().cloned().unwrap_or_default();
    if let Some(right) = inputs.get(1) {
        for col in right {
            if !merged.iter().any(|c| c.name == col.name) {
                merged.push(col.clone());
            }
        }
    }
    merged
}

/// Group-key columns (dtype preserved) followed by aggregation outputs.
fn group_by(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };

    let mut output: Vec<ColumnSchema> = string_list(config, "group_columns")
        .iter()
        .filter_map(|name| input.iter().find(|c| &c.name == name).cloned())
        .collect();

    for agg in config.get("aggregations").and_then(Value::as_array).into_iter().flatten() {
        let function = agg.get("function").and_then(Value::as_str).unwrap_or("agg");
        let column = agg.get("column").and_then(Value::as_str).unwrap_or("");
        let alias = agg
            .get("alias")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{}_{column}", function.to_lowercase()), str::to_string);
        let dtype = agg
            .get("output_dtype")
            .and_then(Value::as_str)
            .and_then(Dtype::parse)
            .unwrap_or(Dtype::Float64);
        output.push(ColumnSchema::nullable(alias, dtype));
    }

    output
}

/// Row-key columns followed by a single `<value_col>_<agg>` float64 column.
/// The actual column explosion happens at query time.
fn pivot(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };

    let mut output: Vec<ColumnSchema> = string_list(config, "row_columns")
        .iter()
        .filter_map(|name| input.iter().find(|c| &c.name == name).cloned())
        .collect();

    let value_column = config.get("value_column").and_then(Value::as_str).unwrap_or_default();
    if !value_column.is_empty() {
        let aggregation = config.get("aggregation").and_then(Value::as_str).unwrap_or("SUM");
        output.push(ColumnSchema::nullable(
            format!("{value_column}_{}", aggregation.to_lowercase()),
            Dtype::Float64,
        ));
    }

    output
}

/// Input columns plus one calculated column.
fn formula(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };
    let mut output = input.clone();
    let name = config
        .get("output_column")
        .and_then(Value::as_str)
        .unwrap_or("calculated");
    let dtype = config
        .get("output_dtype")
        .and_then(Value::as_str)
        .and_then(Dtype::parse)
        .unwrap_or(Dtype::Float64);
    output.push(ColumnSchema::nullable(name, dtype));
    output
}

/// Input columns plus one window-function column whose dtype depends on the
/// function: SUM/AVG/MIN/MAX → float64; LAG/LEAD/FIRST_VALUE/LAST_VALUE →
/// dtype of the referenced source column; RANK/ROW_NUMBER → int64.
fn window(config: &Config, inputs: &Inputs) -> Vec<ColumnSchema> {
    let Some(input) = inputs.first() else {
        return Vec::new();
    };
    let mut output = input.clone();

    let function = config
        .get("function")
        .and_then(Value::as_str)
        .unwrap_or("ROW_NUMBER")
        .to_uppercase();
    let dtype = match function.as_str() {
        "SUM" | "AVG" | "MIN" | "MAX" => Dtype::Float64,
        "LAG" | "LEAD" | "FIRST_VALUE" | "LAST_VALUE" => {
            let source = config.get("source_column").and_then(Value::as_str).unwrap_or_default();
            input
                .iter()
                .find(|c| c.name == source)
                .map_or(Dtype::Float64, |c| c.dtype)
        },
        _ => Dtype::Int64,
    };

    let name = config
        .get("output_column")
        .and_then(Value::as_str)
        .unwrap_or("window_result");
    output.push(ColumnSchema::nullable(name, dtype));
    output
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

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> Config {
        value.as_object().cloned().unwrap_or_default()
    }

    fn input() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("symbol", Dtype::String),
            ColumnSchema::new("price", Dtype::Float64),
            ColumnSchema::new("ts", Dtype::Datetime),
        ]
    }

    #[test]
    fn test_select_drops_unknown_names() {
        let out = select(&config(json!({"columns": ["price", "volume", "symbol"]})), &[input()]);
        let names: Vec<&str> = out.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["price", "symbol"]);
    }

    #[test]
    fn test_rename_preserves_dtype() {
        let out = rename(
            &config(json!({"rename_map": {"price": "px"}})),
            &[input()],
        );
        assert_eq!(out[1].name, "px");
        assert_eq!(out[1].dtype, Dtype::Float64);
    }

    #[test]
    fn test_group_by_alias_default() {
        let out = group_by(
            &config(json!({
                "group_columns": ["symbol"],
                "aggregations": [{"column": "price", "function": "AVG"}]
            })),
            &[input()],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].name, "avg_price");
        assert_eq!(out[1].dtype, Dtype::Float64);
        assert!(out[1].nullable);
    }

    #[test]
    fn test_pivot_value_column_naming() {
        let out = pivot(
            &config(json!({"row_columns": ["symbol"], "value_column": "price", "aggregation": "MAX"})),
            &[input()],
        );
        assert_eq!(out[1].name, "price_max");
        assert_eq!(out[1].dtype, Dtype::Float64);
    }

    #[test]
    fn test_window_dtype_follows_source_for_lag() {
        let out = window(
            &config(json!({"function": "LAG", "source_column": "ts", "output_column": "prev_ts"})),
            &[input()],
        );
        assert_eq!(out.last().map(|c| c.dtype), Some(Dtype::Datetime));
    }

    #[test]
    fn test_window_rank_is_int64() {
        let out = window(&config(json!({"function": "RANK"})), &[input()]);
        assert_eq!(out.last().map(|c| c.dtype), Some(Dtype::Int64));
    }

    #[test]
    fn test_data_source_ignores_inputs() {
        let out = apply(
            NodeKind::DataSource,
            &config(json!({"columns": [{"name": "a", "dtype": "int64"}]})),
            &[input()],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn test_empty_inputs_yield_empty_schema() {
        assert!(passthrough(&[]).is_empty());
        assert!(select(&config(json!({"columns": ["a"]})), &[]).is_empty());
        assert!(formula(&Config::new(), &[]).is_empty());
    }
}
