//! Dialect-aware SQL rendering.
//!
//! Identifiers are quoted per component (split on `.`), string literals are
//! escaped by quote doubling, and request-supplied values render as the
//! dialect's native placeholder form — `{name:Type}` for the analytical
//! store, `$n` positional for the live store — with the bound parameters
//! returned in placeholder order.

use serde_json::Value;

use lattice_error::CompileError;

use crate::graph::Dtype;

use super::ast::{
    Dialect, FromSource, OrderKey, Projection, SelectQuery, SqlExpr, SqlLiteral,
};

/// A parameter bound to a rendered statement, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Placeholder name.
    pub name:  String,
    /// Declared type.
    pub dtype: Dtype,
    /// Value to bind at dispatch.
    pub value: Value,
}

/// The output of rendering: SQL text plus ordered bound parameters.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    /// The SQL statement.
    pub sql:    String,
    /// Bound parameters in placeholder order.
    pub params: Vec<BoundParam>,
}

pub(super) fn render_select(
    query: &SelectQuery,
    dialect: Dialect,
) -> Result<RenderedSql, CompileError> {
    let mut renderer = Renderer {
        dialect,
        params: Vec::new(),
    };
    let sql = renderer.select(query)?;
    Ok(RenderedSql {
        sql,
        params: renderer.params,
    })
}

/// Quote an identifier, splitting schema-qualified names on `.` and
/// doubling embedded quotes per component.
#[must_use]
pub(super) fn quote_identifier(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

struct Renderer {
    dialect: Dialect,
    params:  Vec<BoundParam>,
}

impl Renderer {
    fn select(&mut self, query: &SelectQuery) -> Result<String, CompileError> {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        match &query.projection {
            Projection::Star => sql.push('*'),
            Projection::Items(items) => {
                let rendered: Result<Vec<String>, CompileError> = items
                    .iter()
                    .map(|item| {
                        let expr = self.expr(&item.expr)?;
                        Ok(match &item.alias {
                            Some(alias) => format!("{expr} AS {}", quote_identifier(alias)),
                            None => expr,
                        })
                    })
                    .collect();
                sql.push_str(&rendered?.join(", "));
            },
        }

        sql.push_str(" FROM ");
        sql.push_str(&self.from_source(&query.from)?);

        if !query.filters.is_empty() {
            let conjuncts: Result<Vec<String>, CompileError> =
                query.filters.iter().map(|f| self.expr(f)).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conjuncts?.join(" AND "));
        }

        if !query.group_by.is_empty() {
            let keys: Result<Vec<String>, CompileError> =
                query.group_by.iter().map(|k| self.expr(k)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys?.join(", "));
        }

        if !query.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_keys(&query.order_by)?);
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        // Execution budgets are an analytical-store concept; the live store
        // gets its budget from the router's wall-time deadline instead.
        if self.dialect == Dialect::Analytical && !query.settings.is_empty() {
            let parts: Vec<String> = query
                .settings
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            sql.push_str(" SETTINGS ");
            sql.push_str(&parts.join(", "));
        }

        Ok(sql)
    }

    fn from_source(&mut self, from: &FromSource) -> Result<String, CompileError> {
        match from {
            FromSource::Table(name) => Ok(quote_identifier(name)),
            FromSource::Subquery { query, alias } => {
                let inner = self.select(query)?;
                Ok(format!("({inner}) AS {}", quote_identifier(alias)))
            },
            FromSource::Join {
                left,
                right,
                kind,
                on,
            } => {
                let left_sql = self.select(left)?;
                let right_sql = self.select(right)?;
                let conditions: Vec<String> = on
                    .iter()
                    .map(|(l, r)| {
                        format!(
                            "\"_left\".{} = \"_right\".{}",
                            quote_identifier(l),
                            quote_identifier(r)
                        )
                    })
                    .collect();
                Ok(format!(
                    "({left_sql}) AS \"_left\" {} ({right_sql}) AS \"_right\" ON {}",
                    kind.keyword(),
                    conditions.join(" AND ")
                ))
            },
            FromSource::UnionAll { left, right } => {
                let left_sql = self.select(left)?;
                let right_sql = self.select(right)?;
                Ok(format!("(({left_sql}) UNION ALL ({right_sql})) AS \"_union\""))
            },
        }
    }

    fn order_keys(&mut self, keys: &[OrderKey]) -> Result<String, CompileError> {
        let rendered: Result<Vec<String>, CompileError> = keys
            .iter()
            .map(|key| {
                let expr = self.expr(&key.expr)?;
                Ok(if key.descending {
                    format!("{expr} DESC")
                } else {
                    format!("{expr} ASC")
                })
            })
            .collect();
        Ok(rendered?.join(", "))
    }

    fn expr(&mut self, expr: &SqlExpr) -> Result<String, CompileError> {
        match expr {
            SqlExpr::Column(name) => Ok(quote_identifier(name)),
            SqlExpr::Qualified { table, column } => {
                Ok(format!("{}.{}", quote_identifier(table), quote_identifier(column)))
            },
            SqlExpr::Literal(lit) => Ok(render_literal(lit)),
            SqlExpr::Param { name, dtype, value } => {
                self.params.push(BoundParam {
                    name:  name.clone(),
                    dtype: *dtype,
                    value: value.clone(),
                });
                Ok(match self.dialect {
                    Dialect::Analytical => {
                        format!("{{{name}:{}}}", analytical_param_type(*dtype))
                    },
                    Dialect::Live => format!("${}", self.params.len()),
                })
            },
            SqlExpr::Neg(inner) => Ok(format!("-({})", self.expr(inner)?)),
            SqlExpr::Binary { left, op, right } => Ok(format!(
                "({} {} {})",
                self.expr(left)?,
                op.symbol(),
                self.expr(right)?
            )),
            SqlExpr::Func { name, args } => self.function(name, args),
            SqlExpr::Case {
                branches,
                otherwise,
            } => {
                let mut sql = String::from("CASE");
                for (condition, value) in branches {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.expr(condition)?,
                        self.expr(value)?
                    ));
                }
                if let Some(value) = otherwise {
                    sql.push_str(&format!(" ELSE {}", self.expr(value)?));
                }
                sql.push_str(" END");
                Ok(sql)
            },
            SqlExpr::Between { expr, low, high } => Ok(format!(
                "({} BETWEEN {} AND {})",
                self.expr(expr)?,
                self.expr(low)?,
                self.expr(high)?
            )),
            SqlExpr::InList { expr, items } => {
                let rendered: Result<Vec<String>, CompileError> =
                    items.iter().map(|item| self.expr(item)).collect();
                Ok(format!("{} IN ({})", self.expr(expr)?, rendered?.join(", ")))
            },
            SqlExpr::IsNull { expr, negated } => Ok(format!(
                "{} IS {}NULL",
                self.expr(expr)?,
                if *negated { "NOT " } else { "" }
            )),
            SqlExpr::Like { expr, pattern } => {
                Ok(format!("{} LIKE {}", self.expr(expr)?, self.expr(pattern)?))
            },
            SqlExpr::WindowFunc {
                name,
                args,
                partition_by,
                order_by,
            } => {
                let function = window_function_name(name, self.dialect)?;
                let rendered_args: Result<Vec<String>, CompileError> =
                    args.iter().map(|a| self.expr(a)).collect();
                let mut over = String::new();
                if !partition_by.is_empty() {
                    let keys: Result<Vec<String>, CompileError> =
                        partition_by.iter().map(|k| self.expr(k)).collect();
                    over.push_str(&format!("PARTITION BY {}", keys?.join(", ")));
                }
                if !order_by.is_empty() {
                    if !over.is_empty() {
                        over.push(' ');
                    }
                    over.push_str(&format!("ORDER BY {}", self.order_keys(order_by)?));
                }
                Ok(format!("{function}({}) OVER ({over})", rendered_args?.join(", ")))
            },
        }
    }

    /// Render a canonical-named function for the active dialect.
    fn function(&mut self, name: &str, args: &[SqlExpr]) -> Result<String, CompileError> {
        // Special forms first: these change shape, not just spelling.
        match (name, self.dialect) {
            ("IF", Dialect::Live) => {
                let (condition, then, otherwise) = ternary_args(name, args)?;
                return Ok(format!(
                    "CASE WHEN {} THEN {} ELSE {} END",
                    self.expr(condition)?,
                    self.expr(then)?,
                    self.expr(otherwise)?
                ));
            },
            ("CONTAINS", _) => {
                let (haystack, needle) = binary_args(name, args)?;
                let locate = match self.dialect {
                    Dialect::Analytical => "position",
                    Dialect::Live => "strpos",
                };
                return Ok(format!(
                    "({locate}({}, {}) > 0)",
                    self.expr(haystack)?,
                    self.expr(needle)?
                ));
            },
            ("DATE_DIFF", _) => return self.date_diff(args),
            ("DATE_ADD", _) => return self.date_add(args),
            ("MEDIAN", Dialect::Live) => {
                let arg = unary_arg(name, args)?;
                return Ok(format!(
                    "percentile_cont(0.5) WITHIN GROUP (ORDER BY {})",
                    self.expr(arg)?
                ));
            },
            ("YEAR" | "MONTH" | "DAY" | "HOUR" | "MINUTE", Dialect::Live) => {
                let arg = unary_arg(name, args)?;
                return Ok(format!("EXTRACT({} FROM {})", name, self.expr(arg)?));
            },
            _ => {},
        }

        let spelled = scalar_function_name(name, self.dialect)?;
        let rendered: Result<Vec<String>, CompileError> =
            args.iter().map(|a| self.expr(a)).collect();
        Ok(format!("{spelled}({})", rendered?.join(", ")))
    }

    fn date_diff(&mut self, args: &[SqlExpr]) -> Result<String, CompileError> {
        let (unit, from, to) = date_unit_args("DATE_DIFF", args)?;
        match self.dialect {
            Dialect::Analytical => Ok(format!(
                "dateDiff('{unit}', {}, {})",
                self.expr(from)?,
                self.expr(to)?
            )),
            Dialect::Live => {
                let from_sql = self.expr(from)?;
                let to_sql = self.expr(to)?;
                Ok(match unit.as_str() {
                    "year" => format!(
                        "(EXTRACT(YEAR FROM {to_sql}) - EXTRACT(YEAR FROM {from_sql}))"
                    ),
                    "month" => format!(
                        "((EXTRACT(YEAR FROM {to_sql}) - EXTRACT(YEAR FROM {from_sql})) * 12 + \
                         (EXTRACT(MONTH FROM {to_sql}) - EXTRACT(MONTH FROM {from_sql})))"
                    ),
                    unit => {
                        let seconds: u64 = match unit {
                            "day" => 86_400,
                            "hour" => 3_600,
                            "minute" => 60,
                            _ => 1,
                        };
                        format!(
                            "FLOOR(EXTRACT(EPOCH FROM ({to_sql} - {from_sql})) / {seconds})"
                        )
                    },
                })
            },
        }
    }

    fn date_add(&mut self, args: &[SqlExpr]) -> Result<String, CompileError> {
        let (unit, amount, date) = date_unit_args("DATE_ADD", args)?;
        match self.dialect {
            Dialect::Analytical => Ok(format!(
                "dateAdd({unit}, {}, {})",
                self.expr(amount)?,
                self.expr(date)?
            )),
            Dialect::Live => Ok(format!(
                "({} + ({}) * INTERVAL '1 {unit}')",
                self.expr(date)?,
                self.expr(amount)?
            )),
        }
    }
}

fn render_literal(lit: &SqlLiteral) -> String {
    match lit {
        SqlLiteral::String(s) => format!("'{}'", s.replace('\'', "''")),
        SqlLiteral::Int(i) => i.to_string(),
        SqlLiteral::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        },
        SqlLiteral::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlLiteral::Null => "NULL".to_string(),
    }
}

const fn analytical_param_type(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::String => "String",
        Dtype::Int64 => "Int64",
        Dtype::Float64 => "Float64",
        Dtype::Bool => "Bool",
        Dtype::Datetime => "DateTime64(3)",
    }
}

fn scalar_function_name(name: &str, dialect: Dialect) -> Result<&'static str, CompileError> {
    let spelled = match (name, dialect) {
        ("ABS", _) => "abs",
        ("ROUND", _) => "round",
        ("CEIL", _) => "ceil",
        ("FLOOR", _) => "floor",
        ("MOD", Dialect::Analytical) => "modulo",
        ("MOD", Dialect::Live) => "mod",
        ("POWER", Dialect::Analytical) => "pow",
        ("POWER", Dialect::Live) => "power",
        ("SQRT", _) => "sqrt",
        ("LOG", _) => "log",
        ("RAND", Dialect::Analytical) => "rand",
        ("RAND", Dialect::Live) => "random",
        ("UPPER", _) => "upper",
        ("LOWER", _) => "lower",
        ("TRIM", Dialect::Analytical) => "trimBoth",
        ("TRIM", Dialect::Live) => "btrim",
        ("LEFT", _) => "left",
        ("RIGHT", _) => "right",
        ("LENGTH", _) => "length",
        ("CONCAT", _) => "concat",
        ("REPLACE", Dialect::Analytical) => "replaceAll",
        ("REPLACE", Dialect::Live) => "replace",
        ("YEAR", Dialect::Analytical) => "toYear",
        ("MONTH", Dialect::Analytical) => "toMonth",
        ("DAY", Dialect::Analytical) => "toDayOfMonth",
        ("HOUR", Dialect::Analytical) => "toHour",
        ("MINUTE", Dialect::Analytical) => "toMinute",
        ("NOW", _) => "now",
        ("IF", Dialect::Analytical) => "if",
        ("COALESCE", _) => "coalesce",
        ("NULLIF", Dialect::Analytical) => "nullIf",
        ("NULLIF", Dialect::Live) => "nullif",
        ("SUM", _) => "sum",
        ("AVG", _) => "avg",
        ("COUNT", _) => "count",
        ("MIN", _) => "min",
        ("MAX", _) => "max",
        ("MEDIAN", Dialect::Analytical) => "median",
        ("STDDEV", Dialect::Analytical) => "stddevSamp",
        ("STDDEV", Dialect::Live) => "stddev_samp",
        _ => {
            return Err(CompileError::unsupported(format!(
                "function '{name}' has no {} rendering",
                dialect.as_str()
            )));
        },
    };
    Ok(spelled)
}

fn window_function_name(name: &str, dialect: Dialect) -> Result<&'static str, CompileError> {
    let spelled = match (name, dialect) {
        ("LAG", Dialect::Analytical) => "lagInFrame",
        ("LEAD", Dialect::Analytical) => "leadInFrame",
        ("LAG", Dialect::Live) => "lag",
        ("LEAD", Dialect::Live) => "lead",
        ("FIRST_VALUE", _) => "first_value",
        ("LAST_VALUE", _) => "last_value",
        ("ROW_NUMBER", _) => "row_number",
        ("RANK", _) => "rank",
        ("SUM", _) => "sum",
        ("AVG", _) => "avg",
        ("MIN", _) => "min",
        ("MAX", _) => "max",
        ("COUNT", _) => "count",
        _ => {
            return Err(CompileError::unsupported(format!(
                "window function '{name}' has no {} rendering",
                dialect.as_str()
            )));
        },
    };
    Ok(spelled)
}

fn unary_arg<'a>(name: &str, args: &'a [SqlExpr]) -> Result<&'a SqlExpr, CompileError> {
    match args {
        [only] => Ok(only),
        _ => Err(CompileError::invalid_filter(format!("{name} takes exactly one argument"))),
    }
}

fn binary_args<'a>(
    name: &str,
    args: &'a [SqlExpr],
) -> Result<(&'a SqlExpr, &'a SqlExpr), CompileError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(CompileError::invalid_filter(format!("{name} takes exactly two arguments"))),
    }
}

fn ternary_args<'a>(
    name: &str,
    args: &'a [SqlExpr],
) -> Result<(&'a SqlExpr, &'a SqlExpr, &'a SqlExpr), CompileError> {
    match args {
        [a, b, c] => Ok((a, b, c)),
        _ => Err(CompileError::invalid_filter(format!("{name} takes exactly three arguments"))),
    }
}

/// Extract `(unit, second_arg, third_arg)` where the first argument must be
/// a string literal naming a supported date unit.
fn date_unit_args<'a>(
    name: &str,
    args: &'a [SqlExpr],
) -> Result<(String, &'a SqlExpr, &'a SqlExpr), CompileError> {
    let (first, a, b) = ternary_args(name, args)?;
    let SqlExpr::Literal(SqlLiteral::String(unit)) = first else {
        return Err(CompileError::invalid_filter(format!(
            "{name} requires a literal unit as its first argument"
        )));
    };
    let unit = unit.to_ascii_lowercase();
    match unit.as_str() {
        "year" | "month" | "day" | "hour" | "minute" | "second" => Ok((unit, a, b)),
        other => Err(CompileError::invalid_filter(format!("unsupported date unit '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::ast::{BinaryOp, JoinKind, SelectItem};
    use super::*;

    fn table_query(table: &str) -> SelectQuery {
        SelectQuery {
            projection: Projection::Star,
            from: FromSource::Table(table.to_string()),
            ..SelectQuery::default()
        }
    }

    #[test]
    fn test_quote_identifier_splits_and_escapes() {
        assert_eq!(quote_identifier("trades"), "\"trades\"");
        assert_eq!(quote_identifier("market.trades"), "\"market\".\"trades\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_param_placeholders_per_dialect() {
        let mut query = table_query("trades");
        query.filters.push(SqlExpr::binary(
            SqlExpr::col("symbol"),
            BinaryOp::Eq,
            SqlExpr::Param {
                name:  "f0".to_string(),
                dtype: Dtype::String,
                value: json!("AAPL"),
            },
        ));

        let analytical = render_select(&query, Dialect::Analytical).expect("renders");
        assert_eq!(
            analytical.sql,
            "SELECT * FROM \"trades\" WHERE (\"symbol\" = {f0:String})"
        );
        assert_eq!(analytical.params.len(), 1);
        assert_eq!(analytical.params[0].name, "f0");

        let live = render_select(&query, Dialect::Live).expect("renders");
        assert_eq!(live.sql, "SELECT * FROM \"trades\" WHERE (\"symbol\" = $1)");
    }

    #[test]
    fn test_settings_only_on_analytical() {
        let mut query = table_query("trades");
        query.settings = vec![("max_execution_time".to_string(), 3)];

        let analytical = render_select(&query, Dialect::Analytical).expect("renders");
        assert!(analytical.sql.ends_with("SETTINGS max_execution_time=3"));

        let live = render_select(&query, Dialect::Live).expect("renders");
        assert!(!live.sql.contains("SETTINGS"));
    }

    #[test]
    fn test_join_render_uses_aliased_subqueries() {
        let query = SelectQuery {
            projection: Projection::Items(vec![
                SelectItem {
                    expr:  SqlExpr::Qualified {
                        table:  "_left".to_string(),
                        column: "symbol".to_string(),
                    },
                    alias: None,
                },
            ]),
            from: FromSource::Join {
                left:  Box::new(table_query("trades")),
                right: Box::new(table_query("sectors")),
                kind:  JoinKind::Left,
                on:    vec![("symbol".to_string(), "symbol".to_string())],
            },
            ..SelectQuery::default()
        };
        let rendered = render_select(&query, Dialect::Analytical).expect("renders");
        assert_eq!(
            rendered.sql,
            "SELECT \"_left\".\"symbol\" FROM (SELECT * FROM \"trades\") AS \"_left\" \
             LEFT JOIN (SELECT * FROM \"sectors\") AS \"_right\" \
             ON \"_left\".\"symbol\" = \"_right\".\"symbol\""
        );
    }

    #[test]
    fn test_union_all_render() {
        let query = SelectQuery {
            projection: Projection::Star,
            from: FromSource::UnionAll {
                left:  Box::new(table_query("a")),
                right: Box::new(table_query("b")),
            },
            ..SelectQuery::default()
        };
        let rendered = render_select(&query, Dialect::Live).expect("renders");
        assert_eq!(
            rendered.sql,
            "SELECT * FROM ((SELECT * FROM \"a\") UNION ALL (SELECT * FROM \"b\")) AS \"_union\""
        );
    }

    #[test]
    fn test_if_lowering_differs_by_dialect() {
        let call = SqlExpr::Func {
            name: "IF".to_string(),
            args: vec![
                SqlExpr::binary(SqlExpr::col("price"), BinaryOp::Gt, SqlExpr::Literal(SqlLiteral::Int(100))),
                SqlExpr::string("high"),
                SqlExpr::string("low"),
            ],
        };
        let mut query = table_query("trades");
        query.projection = Projection::Items(vec![SelectItem::aliased(call, "band")]);

        let analytical = render_select(&query, Dialect::Analytical).expect("renders");
        assert!(analytical.sql.contains("if((\"price\" > 100), 'high', 'low')"));

        let live = render_select(&query, Dialect::Live).expect("renders");
        assert!(live.sql.contains("CASE WHEN (\"price\" > 100) THEN 'high' ELSE 'low' END"));
    }

    #[test]
    fn test_date_diff_day_on_live_uses_epoch() {
        let call = SqlExpr::Func {
            name: "DATE_DIFF".to_string(),
            args: vec![
                SqlExpr::string("day"),
                SqlExpr::col("opened_at"),
                SqlExpr::col("closed_at"),
            ],
        };
        let mut query = table_query("positions");
        query.projection = Projection::Items(vec![SelectItem::aliased(call, "held_days")]);
        let live = render_select(&query, Dialect::Live).expect("renders");
        assert!(live.sql.contains("EXTRACT(EPOCH FROM (\"closed_at\" - \"opened_at\")) / 86400"));
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(render_literal(&SqlLiteral::String("O'Hare".to_string())), "'O''Hare'");
        assert_eq!(render_literal(&SqlLiteral::Float(150.0)), "150.0");
        assert_eq!(render_literal(&SqlLiteral::Float(150.5)), "150.5");
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        let mut query = table_query("t");
        query.projection = Projection::Items(vec![SelectItem::aliased(
            SqlExpr::Func {
                name: "EXPLODE".to_string(),
                args: vec![],
            },
            "x",
        )]);
        let err = render_select(&query, Dialect::Analytical).expect_err("must reject");
        assert!(err.detail.contains("EXPLODE"));
    }

    #[test]
    fn test_window_function_render() {
        let expr = SqlExpr::WindowFunc {
            name:         "ROW_NUMBER".to_string(),
            args:         vec![],
            partition_by: vec![SqlExpr::col("symbol")],
            order_by:     vec![OrderKey {
                expr:       SqlExpr::col("ts"),
                descending: true,
            }],
        };
        let mut query = table_query("trades");
        query.projection = Projection::Items(vec![SelectItem::aliased(expr, "rn")]);
        let rendered = render_select(&query, Dialect::Live).expect("renders");
        assert!(rendered
            .sql
            .contains("row_number() OVER (PARTITION BY \"symbol\" ORDER BY \"ts\" DESC) AS \"rn\""));
    }
}
