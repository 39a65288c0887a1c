/// A compiled segment could not be dispatched or executed.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The segment names a target store the router does not know.
    /// Non-retryable: the compiler and router disagree on the store set.
    #[error("Unknown target store: {target}")]
    UnknownTarget {
        /// The unrecognized target name.
        target: String,
    },

    /// The backing store could not be reached at all.
    #[error("Store unavailable: {store}: {detail}")]
    StoreUnavailable {
        /// Which store failed.
        store:  String,
        /// Transport-level failure detail.
        detail: String,
    },

    /// The store accepted the connection but rejected or failed the query.
    #[error("Query failed on {store}: {detail}")]
    QueryFailed {
        /// Which store failed.
        store:  String,
        /// Store-side error detail.
        detail: String,
    },

    /// The dispatch exceeded its wall-time budget.
    #[error("Query exceeded {budget_ms}ms budget on {store}")]
    Timeout {
        /// Which store the query was running on.
        store:     String,
        /// The wall-time budget that was exceeded, in milliseconds.
        budget_ms: u64,
    },
}

impl RouterError {
    /// Stable string identifier for envelopes and status frames.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownTarget { .. } => "unknown_target",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::QueryFailed { .. } => "query_failed",
            Self::Timeout { .. } => "query_timeout",
        }
    }

    /// Whether a caller may reasonably retry this dispatch.
    ///
    /// The router itself never retries; this informs caller-level policy.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Timeout { .. })
    }
}
