//! Column schema types.

use serde::{Deserialize, Serialize};

/// Engine-internal normalized column type.
///
/// Store-native type names (e.g. `UInt64`, `Nullable(Float32)`, `numeric`)
/// are mapped to this set on ingress from catalog queries; the engine never
/// sees a native name past that boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// Timestamp with or without zone, normalized to UTC.
    Datetime,
}

impl Dtype {
    /// Wire name, identical to the serde form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
        }
    }

    /// Parse the wire name; `None` for anything else.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(Self::String),
            "int64" => Some(Self::Int64),
            "float64" => Some(Self::Float64),
            "bool" => Some(Self::Bool),
            "datetime" => Some(Self::Datetime),
            _ => None,
        }
    }
}

/// One column of a node's output schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name as exposed to downstream nodes.
    pub name:        String,
    /// Normalized type.
    pub dtype:       Dtype,
    /// Whether NULL values may appear.
    #[serde(default)]
    pub nullable:    bool,
    /// Optional human description, carried from the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnSchema {
    /// Shorthand constructor for a non-nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: Dtype) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: false,
            description: None,
        }
    }

    /// Shorthand constructor for a nullable column.
    #[must_use]
    pub fn nullable(name: impl Into<String>, dtype: Dtype) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: true,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Dtype::Int64).expect("serializable"), "\"int64\"");
        let parsed: Dtype = serde_json::from_str("\"datetime\"").expect("parseable");
        assert_eq!(parsed, Dtype::Datetime);
    }

    #[test]
    fn test_dtype_parse_matches_as_str() {
        for dtype in [Dtype::String, Dtype::Int64, Dtype::Float64, Dtype::Bool, Dtype::Datetime] {
            assert_eq!(Dtype::parse(dtype.as_str()), Some(dtype));
        }
        assert_eq!(Dtype::parse("decimal"), None);
    }
}
