//! Typed SQL statement model.

use serde_json::Value;

use crate::graph::Dtype;

/// The SQL variant emitted for a segment, determined by its target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Columnar analytical store (SQL over HTTP, `SETTINGS` budget clauses,
    /// `{name:Type}` typed placeholders).
    Analytical,
    /// Live incremental-view store (PostgreSQL wire protocol, `$n`
    /// positional placeholders).
    Live,
}

impl Dialect {
    /// Wire name used in compiled segments.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Live => "live",
        }
    }
}

/// Scalar literal embedded in a query.
///
/// Only compiler-owned constants render as literals; anything that arrived
/// in a request becomes a [`SqlExpr::Param`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlLiteral {
    /// String literal; rendered with quote doubling.
    String(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Boolean literal.
    Bool(bool),
    /// NULL.
    Null,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A SQL scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Bare column reference.
    Column(String),
    /// Table-qualified column reference (`_left.symbol`).
    Qualified {
        /// Table or subquery alias.
        table:  String,
        /// Column name.
        column: String,
    },
    /// Compiler-owned literal.
    Literal(SqlLiteral),
    /// Bound parameter carrying a request-supplied value.
    Param {
        /// Placeholder name, unique within a statement.
        name:  String,
        /// Declared type, used for typed placeholders.
        dtype: Dtype,
        /// The value to bind at dispatch time.
        value: Value,
    },
    /// Arithmetic negation.
    Neg(Box<SqlExpr>),
    /// Binary operation.
    Binary {
        /// Left operand.
        left:  Box<SqlExpr>,
        /// Operator.
        op:    BinaryOp,
        /// Right operand.
        right: Box<SqlExpr>,
    },
    /// Function call by canonical (dialect-independent) name.
    Func {
        /// Canonical function name (`ROUND`, `DATE_DIFF`, …).
        name: String,
        /// Argument expressions.
        args: Vec<SqlExpr>,
    },
    /// Searched CASE expression.
    Case {
        /// `WHEN cond THEN value` branches.
        branches:  Vec<(SqlExpr, SqlExpr)>,
        /// Optional ELSE value.
        otherwise: Option<Box<SqlExpr>>,
    },
    /// `expr BETWEEN low AND high`.
    Between {
        /// Tested expression.
        expr: Box<SqlExpr>,
        /// Lower bound (inclusive).
        low:  Box<SqlExpr>,
        /// Upper bound (inclusive).
        high: Box<SqlExpr>,
    },
    /// `expr IN (…)`.
    InList {
        /// Tested expression.
        expr:  Box<SqlExpr>,
        /// List members.
        items: Vec<SqlExpr>,
    },
    /// `expr IS NULL` / `expr IS NOT NULL`.
    IsNull {
        /// Tested expression.
        expr:    Box<SqlExpr>,
        /// True renders `IS NOT NULL`.
        negated: bool,
    },
    /// `expr LIKE pattern`.
    Like {
        /// Tested expression.
        expr:    Box<SqlExpr>,
        /// Pattern (usually a bound parameter with `%` affixes pre-applied).
        pattern: Box<SqlExpr>,
    },
    /// Window function application.
    WindowFunc {
        /// Canonical function name (`SUM`, `LAG`, `ROW_NUMBER`, …).
        name:         String,
        /// Function arguments.
        args:         Vec<SqlExpr>,
        /// PARTITION BY expressions.
        partition_by: Vec<SqlExpr>,
        /// ORDER BY keys inside the OVER clause.
        order_by:     Vec<OrderKey>,
    },
}

impl SqlExpr {
    /// Shorthand for a column reference.
    #[must_use]
    pub fn col(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    /// Shorthand for a string literal.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(SqlLiteral::String(value.into()))
    }

    /// Shorthand for a binary operation.
    #[must_use]
    pub fn binary(left: Self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            left:  Box::new(left),
            op,
            right: Box::new(right),
        }
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// Sort expression.
    pub expr:       SqlExpr,
    /// Descending order when true.
    pub descending: bool,
}

/// A projected expression with an optional alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// The projected expression.
    pub expr:  SqlExpr,
    /// Output alias.
    pub alias: Option<String>,
}

impl SelectItem {
    /// Bare column projection.
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            expr:  SqlExpr::col(name),
            alias: None,
        }
    }

    /// Aliased expression projection.
    #[must_use]
    pub fn aliased(expr: SqlExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

/// What a SELECT projects.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// `SELECT *`.
    #[default]
    Star,
    /// Explicit projection list.
    Items(Vec<SelectItem>),
}

/// Join variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub(crate) const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL OUTER JOIN",
        }
    }

    /// Parse the config wire name (`inner`, `left`, `right`, `full`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "inner" => Some(Self::Inner),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// The FROM clause of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    /// A named table or view, possibly schema-qualified.
    Table(String),
    /// A parenthesized subquery with an alias.
    Subquery {
        /// Inner query.
        query: Box<SelectQuery>,
        /// Subquery alias.
        alias: String,
    },
    /// Two upstream queries joined on declared key pairs, exposed as
    /// aliased subqueries `_left` and `_right`.
    Join {
        /// Left input.
        left:  Box<SelectQuery>,
        /// Right input.
        right: Box<SelectQuery>,
        /// Join variant.
        kind:  JoinKind,
        /// `(left_column, right_column)` equality pairs.
        on:    Vec<(String, String)>,
    },
    /// `UNION ALL` of two upstream queries.
    UnionAll {
        /// First input.
        left:  Box<SelectQuery>,
        /// Second input.
        right: Box<SelectQuery>,
    },
}

impl Default for FromSource {
    fn default() -> Self {
        Self::Table(String::new())
    }
}

/// A complete SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    /// Projection list.
    pub projection: Projection,
    /// FROM clause.
    pub from:       FromSource,
    /// WHERE conjuncts, combined with AND.
    pub filters:    Vec<SqlExpr>,
    /// GROUP BY expressions.
    pub group_by:   Vec<SqlExpr>,
    /// ORDER BY keys.
    pub order_by:   Vec<OrderKey>,
    /// SELECT DISTINCT when true.
    pub distinct:   bool,
    /// LIMIT clause.
    pub limit:      Option<u64>,
    /// OFFSET clause.
    pub offset:     Option<u64>,
    /// Execution-budget settings, rendered as a trailing `SETTINGS` clause
    /// on the analytical dialect and ignored on others.
    pub settings:   Vec<(String, u64)>,
}
