//! Formula expression parsing and lowering.
//!
//! Formula nodes carry expressions in bracket syntax:
//!
//! ```text
//! ROUND([price] * [quantity], 2)
//! IF([price] > 100, "high", "low")
//! ```
//!
//! Grammar (recursive descent):
//!
//! ```text
//! expression = additive (cmp_op additive)?
//! additive   = term (('+' | '-') term)*
//! term       = factor (('*' | '/') factor)*
//! factor     = NUMBER | STRING | COLUMN_REF | function_call
//!            | '(' expression ')' | '-' factor
//! COLUMN_REF = '[' column_name ']'
//! ```
//!
//! The function set is closed; identifiers outside it fail at parse time,
//! and column references are validated against the declared input schema
//! before any SQL is emitted.

mod lexer;
mod parser;

pub use lexer::{Token, TokenKind};

use std::collections::HashSet;

use lattice_error::CompileError;

use crate::graph::ColumnSchema;
use crate::sql::{BinaryOp, OrderKey, SqlExpr, SqlLiteral};

/// Functions allowed in formula expressions.
///
/// Aggregate and window forms parse here but are only meaningful in their
/// enclosing contexts (group-by and sorted lineages respectively); the
/// backing store rejects misuse.
pub const FUNCTIONS: &[&str] = &[
    // Math
    "ABS", "ROUND", "CEIL", "FLOOR", "MOD", "POWER", "SQRT", "LOG",
    // Text
    "UPPER", "LOWER", "TRIM", "LEFT", "RIGHT", "LENGTH", "CONCAT", "REPLACE", "CONTAINS",
    // Date
    "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "DATE_DIFF", "DATE_ADD", "NOW",
    // Logic
    "IF", "CASE", "COALESCE", "NULLIF",
    // Aggregate (only inside a group-by context)
    "SUM", "AVG", "COUNT", "MIN", "MAX", "MEDIAN", "STDDEV",
    // Window (only with an ordering defined)
    "LAG", "LEAD", "ROW_NUMBER", "RANK", "RUNNING_TOTAL",
];

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    String(String),
    /// `[column]` reference.
    Column(String),
    /// Unary minus.
    Neg(Box<FormulaExpr>),
    /// Binary operation (`+ - * / = != < <= > >=`).
    Binary {
        /// Left operand.
        left:  Box<FormulaExpr>,
        /// Operator.
        op:    BinaryOp,
        /// Right operand.
        right: Box<FormulaExpr>,
    },
    /// Whitelisted function call.
    Call {
        /// Canonical (uppercased) function name.
        name: String,
        /// Argument expressions.
        args: Vec<FormulaExpr>,
    },
}

impl FormulaExpr {
    /// Parse a formula expression.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` with kind `FormulaParse` carrying the byte
    /// position of the failure.
    pub fn parse(expression: &str) -> Result<Self, CompileError> {
        let tokens = lexer::tokenize(expression)?;
        parser::parse(&tokens)
    }

    /// Every `[column]` referenced anywhere in the expression.
    #[must_use]
    pub fn referenced_columns(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut HashSet<String>) {
        match self {
            Self::Column(name) => {
                out.insert(name.clone());
            },
            Self::Neg(inner) => inner.collect_columns(out),
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            },
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_columns(out);
                }
            },
            Self::Int(_) | Self::Float(_) | Self::String(_) => {},
        }
    }

    /// Validate that every referenced column exists in the input schema.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` with kind `UnknownColumn` for the first
    /// unresolved reference.
    pub fn validate(&self, input: &[ColumnSchema]) -> Result<(), CompileError> {
        let available: HashSet<&str> = input.iter().map(|c| c.name.as_str()).collect();
        for column in self.referenced_columns() {
            if !available.contains(column.as_str()) {
                return Err(CompileError::unknown_column(&column));
            }
        }
        Ok(())
    }

    /// Lower to the SQL expression AST.
    ///
    /// `CASE(c1, v1, c2, v2, …, else?)` becomes a searched CASE; the window
    /// forms become OVER () applications whose partition/order the compiler
    /// fills in from the surrounding lineage.
    #[must_use]
    pub fn lower(&self) -> SqlExpr {
        match self {
            Self::Int(i) => SqlExpr::Literal(SqlLiteral::Int(*i)),
            Self::Float(f) => SqlExpr::Literal(SqlLiteral::Float(*f)),
            Self::String(s) => SqlExpr::Literal(SqlLiteral::String(s.clone())),
            Self::Column(name) => SqlExpr::Column(name.clone()),
            Self::Neg(inner) => SqlExpr::Neg(Box::new(inner.lower())),
            Self::Binary { left, op, right } => SqlExpr::Binary {
                left:  Box::new(left.lower()),
                op:    *op,
                right: Box::new(right.lower()),
            },
            Self::Call { name, args } => lower_call(name, args),
        }
    }
}

fn lower_call(name: &str, args: &[FormulaExpr]) -> SqlExpr {
    match name {
        "CASE" => {
            let lowered: Vec<SqlExpr> = args.iter().map(FormulaExpr::lower).collect();
            let mut branches = Vec::new();
            let mut chunks = lowered.chunks_exact(2);
            for pair in chunks.by_ref() {
                branches.push((pair[0].clone(), pair[1].clone()));
            }
            let otherwise = chunks.remainder().first().cloned().map(Box::new);
            SqlExpr::Case {
                branches,
                otherwise,
            }
        },
        "RUNNING_TOTAL" => SqlExpr::WindowFunc {
            name:         "SUM".to_string(),
            args:         args.iter().map(FormulaExpr::lower).collect(),
            partition_by: Vec::new(),
            order_by:     Vec::<OrderKey>::new(),
        },
        "LAG" | "LEAD" | "ROW_NUMBER" | "RANK" => SqlExpr::WindowFunc {
            name:         name.to_string(),
            args:         args.iter().map(FormulaExpr::lower).collect(),
            partition_by: Vec::new(),
            order_by:     Vec::new(),
        },
        _ => SqlExpr::Func {
            name: name.to_string(),
            args: args.iter().map(FormulaExpr::lower).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use lattice_error::CompileErrorKind;

    use crate::graph::Dtype;

    use super::*;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("price", Dtype::Float64),
            ColumnSchema::new("quantity", Dtype::Int64),
        ]
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let expr = FormulaExpr::parse("[price] + [quantity] * 2").expect("parses");
        let FormulaExpr::Binary { op, right, .. } = &expr else {
            panic!("expected binary at top");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, FormulaExpr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_parse_function_call() {
        let expr = FormulaExpr::parse("ROUND([price] * 1.1, 2)").expect("parses");
        let FormulaExpr::Call { name, args } = &expr else {
            panic!("expected call");
        };
        assert_eq!(name, "ROUND");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_parse_comparison_for_if() {
        let expr = FormulaExpr::parse("IF([price] > 100, \"high\", \"low\")").expect("parses");
        assert_eq!(expr.referenced_columns().len(), 1);
    }

    #[test]
    fn test_unknown_identifier_fails_with_position() {
        let err = FormulaExpr::parse("[price] + frobnicate(1)").expect_err("must reject");
        assert_eq!(err.kind, CompileErrorKind::FormulaParse);
        assert!(err.detail.contains("frobnicate"));
        assert!(err.detail.contains("position 10"));
    }

    #[test]
    fn test_unbalanced_parens_fail() {
        let err = FormulaExpr::parse("ROUND([price], 2").expect_err("must reject");
        assert_eq!(err.kind, CompileErrorKind::FormulaParse);
    }

    #[test]
    fn test_unterminated_column_ref_fails() {
        let err = FormulaExpr::parse("[price + 1").expect_err("must reject");
        assert_eq!(err.kind, CompileErrorKind::FormulaParse);
    }

    #[test]
    fn test_validate_rejects_unknown_column() {
        let expr = FormulaExpr::parse("[price] * [volume]").expect("parses");
        let err = expr.validate(&schema()).expect_err("must reject");
        assert_eq!(err.kind, CompileErrorKind::UnknownColumn);
        assert!(err.detail.contains("volume"));
    }

    #[test]
    fn test_validate_accepts_known_columns() {
        let expr = FormulaExpr::parse("SQRT([price]) + [quantity]").expect("parses");
        expr.validate(&schema()).expect("all columns known");
    }

    #[test]
    fn test_lower_case_call_builds_branches() {
        let expr =
            FormulaExpr::parse("CASE([price] > 10, \"a\", [price] > 5, \"b\", \"c\")").expect("parses");
        let SqlExpr::Case {
            branches,
            otherwise,
        } = expr.lower()
        else {
            panic!("expected case");
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn test_lower_negation() {
        let expr = FormulaExpr::parse("-[price]").expect("parses");
        assert!(matches!(expr.lower(), SqlExpr::Neg(_)));
    }
}
