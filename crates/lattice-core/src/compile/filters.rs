//! Filter node predicate lowering.
//!
//! Filter configs are `{column, operator, value}` with string values as the
//! canvas sends them. Values always become bound parameters, typed from the
//! input schema; only the predicate shape is compiled into the statement.

use serde_json::{Map, Value};

use lattice_error::CompileError;

use crate::graph::{ColumnSchema, Dtype};
use crate::sql::{BinaryOp, SqlExpr};

use super::builder::ParamNames;

/// The closed filter operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=` (or `IS NULL` for the literal value `"NULL"`).
    Eq,
    /// `!=` (or `IS NOT NULL` for the literal value `"NULL"`).
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE '%value%'`
    Contains,
    /// `LIKE 'value%'`
    StartsWith,
    /// `LIKE '%value'`
    EndsWith,
    /// `BETWEEN a AND b` from the value `"a,b"`.
    Between,
    /// `IN (…)` from a comma-separated value list.
    In,
}

impl FilterOp {
    /// Parse the canvas wire name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "contains" => Some(Self::Contains),
            "starts with" => Some(Self::StartsWith),
            "ends with" => Some(Self::EndsWith),
            "between" => Some(Self::Between),
            "in" => Some(Self::In),
            _ => None,
        }
    }
}

/// Lower one filter config into a WHERE conjunct.
///
/// Returns `Ok(None)` for an unconfigured filter (freshly dropped on the
/// canvas), which contributes no predicate.
pub(super) fn lower_filter(
    config: &Map<String, Value>,
    input_schema: &[ColumnSchema],
    params: &mut ParamNames,
) -> Result<Option<SqlExpr>, CompileError> {
    let Some(column) = config.get("column").and_then(Value::as_str).filter(|c| !c.is_empty())
    else {
        return Ok(None);
    };

    let raw_op = config.get("operator").and_then(Value::as_str).unwrap_or("=");
    let op = FilterOp::parse(raw_op)
        .ok_or_else(|| CompileError::invalid_filter(format!("unknown operator '{raw_op}'")))?;

    let value = raw_value(config.get("value"));
    let dtype = input_schema
        .iter()
        .find(|c| c.name == column)
        .map_or(Dtype::String, |c| c.dtype);
    let col = SqlExpr::col(column);

    let predicate = match op {
        FilterOp::Eq if value == "NULL" => SqlExpr::IsNull {
            expr:    Box::new(col),
            negated: false,
        },
        FilterOp::Ne if value == "NULL" => SqlExpr::IsNull {
            expr:    Box::new(col),
            negated: true,
        },
        FilterOp::Eq => SqlExpr::binary(col, BinaryOp::Eq, typed_param(params, dtype, &value)?),
        FilterOp::Ne => SqlExpr::binary(col, BinaryOp::Ne, typed_param(params, dtype, &value)?),
        FilterOp::Lt => SqlExpr::binary(col, BinaryOp::Lt, typed_param(params, dtype, &value)?),
        FilterOp::Le => SqlExpr::binary(col, BinaryOp::Le, typed_param(params, dtype, &value)?),
        FilterOp::Gt => SqlExpr::binary(col, BinaryOp::Gt, typed_param(params, dtype, &value)?),
        FilterOp::Ge => SqlExpr::binary(col, BinaryOp::Ge, typed_param(params, dtype, &value)?),
        FilterOp::Contains => like(params, col, format!("%{value}%")),
        FilterOp::StartsWith => like(params, col, format!("{value}%")),
        FilterOp::EndsWith => like(params, col, format!("%{value}")),
        FilterOp::Between => {
            let Some((low, high)) = value.split_once(',') else {
                return Err(CompileError::invalid_filter(format!(
                    "between expects 'low,high', got '{value}'"
                )));
            };
            SqlExpr::Between {
                expr: Box::new(col),
                low:  Box::new(typed_param(params, dtype, low.trim())?),
                high: Box::new(typed_param(params, dtype, high.trim())?),
            }
        },
        FilterOp::In => {
            let items: Result<Vec<SqlExpr>, CompileError> = value
                .split(',')
                .map(|item| typed_param(params, dtype, item.trim()))
                .collect();
            SqlExpr::InList {
                expr:  Box::new(col),
                items: items?,
            }
        },
    };

    Ok(Some(predicate))
}

fn like(params: &mut ParamNames, col: SqlExpr, pattern: String) -> SqlExpr {
    SqlExpr::Like {
        expr:    Box::new(col),
        pattern: Box::new(SqlExpr::Param {
            name:  params.next(),
            dtype: Dtype::String,
            value: Value::String(pattern),
        }),
    }
}

/// Build a parameter of the column's declared type, parsing the raw string
/// value into the matching JSON shape.
fn typed_param(
    params: &mut ParamNames,
    dtype: Dtype,
    raw: &str,
) -> Result<SqlExpr, CompileError> {
    let value = match dtype {
        Dtype::Int64 => {
            let parsed: i64 = raw.parse().map_err(|_| {
                CompileError::invalid_filter(format!("'{raw}' is not an integer"))
            })?;
            Value::from(parsed)
        },
        Dtype::Float64 => {
            let parsed: f64 = raw.parse().map_err(|_| {
                CompileError::invalid_filter(format!("'{raw}' is not a number"))
            })?;
            Value::from(parsed)
        },
        Dtype::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            other => {
                return Err(CompileError::invalid_filter(format!(
                    "'{other}' is not a boolean"
                )));
            },
        },
        Dtype::String | Dtype::Datetime => Value::String(raw.to_string()),
    };

    Ok(SqlExpr::Param {
        name: params.next(),
        dtype,
        value,
    })
}

fn raw_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
