//! SQL statement model and dialect-aware rendering.
//!
//! All SQL in the engine is built through this typed AST and rendered per
//! dialect — query structure is never assembled by string interpolation,
//! and user-supplied values always become bound parameters.

mod ast;
mod render;

pub use ast::{
    BinaryOp, Dialect, FromSource, JoinKind, OrderKey, Projection, SelectItem, SelectQuery,
    SqlExpr, SqlLiteral,
};
pub use render::{BoundParam, RenderedSql};

use lattice_error::CompileError;

/// Render a query for its dialect, producing the SQL text and the bound
/// parameters in placeholder order.
///
/// # Errors
///
/// Returns `CompileError` for constructs the dialect cannot express (e.g.
/// an unknown function name that slipped past the formula whitelist).
pub fn render(query: &SelectQuery, dialect: Dialect) -> Result<RenderedSql, CompileError> {
    render::render_select(query, dialect)
}

/// Wrap `inner` as `SELECT * FROM (<inner>) AS <alias> LIMIT <limit> OFFSET
/// <offset>`, built via the AST.
///
/// This is the resource-wrapping entry point: the cache-and-execute layer
/// wraps every terminal segment this way before dispatch, then attaches the
/// per-path execution budget.
#[must_use]
pub fn wrap_with_window(inner: SelectQuery, alias: &str, limit: u64, offset: u64) -> SelectQuery {
    SelectQuery {
        projection: Projection::Star,
        from: FromSource::Subquery {
            query: Box::new(inner),
            alias: alias.to_string(),
        },
        limit: Some(limit),
        offset: Some(offset),
        ..SelectQuery::default()
    }
}
