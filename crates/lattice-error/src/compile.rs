/// Classification of workflow compilation failures.
///
/// Each kind maps to a distinct, non-retryable client error. The kind is
/// stable API: it is serialized into error envelopes and published on the
/// `__compiler__` pseudo-node for async execution paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// The workflow graph contains a cycle.
    Cycle,
    /// A node's type is not in the closed node-type set.
    UnknownNodeType,
    /// A column reference does not exist in the declared input schema.
    UnknownColumn,
    /// Schemas disagree where they must match (union inputs, join keys).
    SchemaMismatch,
    /// A formula expression failed to parse.
    FormulaParse,
    /// A filter predicate is malformed (unknown operator, bad value shape).
    InvalidFilter,
    /// An operator was applied to a lineage that cannot support it
    /// (e.g. relational operators downstream of a point-lookup source).
    UnsupportedOperation,
}

impl CompileErrorKind {
    /// Stable string identifier for envelopes and status frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cycle => "cycle",
            Self::UnknownNodeType => "unknown_node_type",
            Self::UnknownColumn => "unknown_column",
            Self::SchemaMismatch => "schema_mismatch",
            Self::FormulaParse => "formula_parse",
            Self::InvalidFilter => "invalid_filter",
            Self::UnsupportedOperation => "unsupported_operation",
        }
    }
}

/// A workflow failed to compile.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Compile error ({}): {detail}", kind.as_str())]
pub struct CompileError {
    /// What class of failure occurred.
    pub kind:   CompileErrorKind,
    /// Human-readable detail, including the offending node or expression.
    pub detail: String,
}

impl CompileError {
    /// Create a compile error of the given kind.
    #[must_use]
    pub fn new(kind: CompileErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// A cycle was detected during topological traversal.
    #[must_use]
    pub fn cycle(detail: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Cycle, detail)
    }

    /// A node declared a type outside the closed set.
    #[must_use]
    pub fn unknown_node_type(node_type: &str) -> Self {
        Self::new(
            CompileErrorKind::UnknownNodeType,
            format!("unknown node type '{node_type}'"),
        )
    }

    /// A `[column]` reference resolved to nothing.
    #[must_use]
    pub fn unknown_column(column: &str) -> Self {
        Self::new(CompileErrorKind::UnknownColumn, format!("unknown column '{column}'"))
    }

    /// Union/join inputs disagree on shape.
    #[must_use]
    pub fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::SchemaMismatch, detail)
    }

    /// A formula expression failed to parse at `position`.
    #[must_use]
    pub fn formula_parse(message: impl Into<String>, position: usize) -> Self {
        Self::new(
            CompileErrorKind::FormulaParse,
            format!("{} at position {position}", message.into()),
        )
    }

    /// A filter predicate could not be lowered.
    #[must_use]
    pub fn invalid_filter(detail: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::InvalidFilter, detail)
    }

    /// An operator is not supported on this lineage.
    #[must_use]
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::UnsupportedOperation, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_detail() {
        let err = CompileError::unknown_column("price");
        assert_eq!(err.to_string(), "Compile error (unknown_column): unknown column 'price'");
    }

    #[test]
    fn test_formula_parse_carries_position() {
        let err = CompileError::formula_parse("unexpected character '~'", 7);
        assert_eq!(err.kind, CompileErrorKind::FormulaParse);
        assert!(err.detail.ends_with("at position 7"));
    }
}
