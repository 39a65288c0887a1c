//! Unified error types for Lattice runtime crates.
//!
//! All runtime crates depend on this crate for error handling.
//!
//! # Error Hierarchy
//!
//! ```text
//! CoreError
//! ├── Validation      - malformed input, invalid graph payloads
//! ├── Compile         - per-node workflow compilation failures
//! ├── Router          - store dispatch failures
//! ├── Auth            - token / API-key failures
//! ├── RateLimited     - embed quota exceeded
//! ├── NotFound        - absent or cross-tenant resource
//! ├── Conflict        - e.g. cancelling a terminal execution
//! ├── Cache           - fast-store failures (always recovered fail-open)
//! ├── Configuration   - config/setup errors
//! └── Internal        - unexpected internal errors
//! ```

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

mod auth;
mod compile;
#[cfg(feature = "axum-compat")]
mod http;
mod router;

pub use auth::AuthError;
pub use compile::{CompileError, CompileErrorKind};
#[cfg(feature = "axum-compat")]
pub use http::{ErrorBody, ErrorDetail};
pub use router::RouterError;

/// Result type alias for Lattice operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Unified error type wrapping all domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input: bad graph payload, invalid filters JSON, bad paging.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        /// Path to the offending field (e.g. `nodes[3].type`).
        path:    Option<String>,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Absent resource. Cross-tenant reads are reported with this variant
    /// so they are indistinguishable from truly missing resources.
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Fast-store failure. Never surfaced to clients: cache reads degrade
    /// to misses and cache writes are skipped, with the error logged.
    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source:  Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CoreError {
    // ========================================================================
    // Constructor helpers
    // ========================================================================

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            path:    None,
        }
    }

    /// Create a validation error with the offending field path.
    #[must_use]
    pub fn validation_at(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            path:    Some(path.into()),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a cache error. Callers must recover from this locally.
    #[must_use]
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source:  None,
        }
    }

    // ========================================================================
    // Error classification
    // ========================================================================

    /// Check if this is a client error (4xx equivalent).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Compile(_)
                | Self::Auth(_)
                | Self::RateLimited { .. }
                | Self::NotFound { .. }
                | Self::Conflict { .. }
        )
    }

    /// Check if this is a server error (5xx equivalent).
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Get the HTTP status code equivalent.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } | Self::Compile(_) => 400,
            Self::Auth(e) => e.status_code(),
            Self::RateLimited { .. } => 429,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Router(e) => match e {
                RouterError::QueryFailed { .. } => 502,
                RouterError::Timeout { .. } => 504,
                _ => 503,
            },
            Self::Cache { .. } | Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Get the stable error code for response envelopes.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Compile(e) => e.kind.as_str(),
            Self::Router(e) => e.error_code(),
            Self::Auth(e) => e.error_code(),
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Cache { .. } => "cache_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation {
            message: e.to_string(),
            path:    Some(format!("line {}, column {}", e.line(), e.column())),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {e}"),
            source:  Some(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_client_error() {
        let err = CoreError::validation("nodes must be a list");
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "validation_error");
    }

    #[test]
    fn test_compile_error_code_is_kind() {
        let err: CoreError = CompileError::cycle("workflow contains a cycle").into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "cycle");
    }

    #[test]
    fn test_not_found_and_conflict() {
        assert_eq!(CoreError::not_found("Workflow").status_code(), 404);
        assert_eq!(CoreError::conflict("execution already finished").status_code(), 409);
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = CoreError::RateLimited {
            retry_after_secs: 2,
        };
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.error_code(), "rate_limit_exceeded");
    }

    #[test]
    fn test_router_errors_map_to_5xx() {
        let err: CoreError = RouterError::StoreUnavailable {
            store:  "live".to_string(),
            detail: "connect timeout".to_string(),
        }
        .into();
        assert!(err.is_server_error());
        assert_eq!(err.status_code(), 503);

        let err: CoreError = RouterError::Timeout {
            store:     "analytical".to_string(),
            budget_ms: 3000,
        }
        .into();
        assert_eq!(err.status_code(), 504);
    }

    #[test]
    fn test_auth_status_split() {
        let unauthorized: CoreError = AuthError::MissingToken.into();
        assert_eq!(unauthorized.status_code(), 401);

        let forbidden: CoreError = AuthError::Forbidden {
            reason: "key not scoped to widget".to_string(),
        }
        .into();
        assert_eq!(forbidden.status_code(), 403);
    }

    #[test]
    fn test_from_serde_error_is_validation() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}
