//! Schema catalog: a fast-store-cached materialization of the source
//! stores' system catalogs.
//!
//! The canvas needs table and column metadata to seed `data_source` nodes;
//! reading system catalogs on every request would hammer the stores, so the
//! materialized catalog lives in the fast store under a TTL. Native type
//! names are normalized to engine dtypes here, on ingress — nothing past
//! this boundary sees a store-native type name.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lattice_error::Result;

use crate::graph::{ColumnSchema, Dtype};
use crate::store::{AnalyticalStore, FastStore, LiveStore};

/// Which store a catalog table lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreName {
    /// Columnar analytical store.
    Analytical,
    /// Incremental-view live store.
    Live,
}

impl StoreName {
    /// Default freshness declared on `data_source` nodes built from this
    /// store's tables.
    #[must_use]
    pub const fn default_freshness(self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Live => "realtime",
        }
    }
}

/// One table in the materialized catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTable {
    /// Table name.
    pub name:      String,
    /// Owning store.
    pub store:     StoreName,
    /// Default freshness for sources built on this table.
    pub freshness: String,
    /// Columns with normalized dtypes.
    pub columns:   Vec<ColumnSchema>,
}

impl CatalogTable {
    /// Start an empty table entry.
    #[must_use]
    pub fn new(name: impl Into<String>, store: StoreName) -> Self {
        Self {
            name: name.into(),
            store,
            freshness: store.default_freshness().to_string(),
            columns: Vec::new(),
        }
    }

    /// Append a column, normalizing its native type name.
    pub fn push_native_column(&mut self, name: impl Into<String>, native: &str) {
        self.columns.push(ColumnSchema {
            name:        name.into(),
            dtype:       dtype_from_native(self.store, native),
            nullable:    native.contains("Nullable") || self.store == StoreName::Live,
            description: None,
        });
    }
}

/// The materialized catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaCatalog {
    /// Tables across all stores.
    pub tables:       Vec<CatalogTable>,
    /// When this materialization was built.
    pub refreshed_at: DateTime<Utc>,
}

/// Map a store-native type name to the engine dtype.
#[must_use]
pub fn dtype_from_native(store: StoreName, native: &str) -> Dtype {
    let lower = native.to_ascii_lowercase();
    match store {
        StoreName::Analytical => {
            if lower.contains("datetime") || lower.contains("date") {
                Dtype::Datetime
            } else if lower.contains("bool") {
                Dtype::Bool
            } else if ["int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64"]
                .iter()
                .any(|t| lower.contains(t))
            {
                Dtype::Int64
            } else if lower.contains("float") || lower.contains("decimal") {
                Dtype::Float64
            } else {
                Dtype::String
            }
        },
        StoreName::Live => match lower.as_str() {
            "smallint" | "integer" | "bigint" => Dtype::Int64,
            "real" | "double precision" | "numeric" => Dtype::Float64,
            "boolean" => Dtype::Bool,
            other if other.starts_with("timestamp") || other == "date" => Dtype::Datetime,
            _ => Dtype::String,
        },
    }
}

/// Serves the materialized catalog with fast-store caching.
pub struct CatalogService {
    analytical: Arc<AnalyticalStore>,
    live:       Arc<LiveStore>,
    fast:       FastStore,
    cache_key:  String,
    ttl_secs:   u64,
}

impl CatalogService {
    /// Create a catalog service.
    #[must_use]
    pub fn new(
        analytical: Arc<AnalyticalStore>,
        live: Arc<LiveStore>,
        fast: FastStore,
        namespace: &str,
        ttl_secs: u64,
    ) -> Self {
        Self {
            analytical,
            live,
            fast,
            cache_key: format!("{namespace}:schema:catalog"),
            ttl_secs,
        }
    }

    /// Get the catalog, read-through cached.
    ///
    /// Fast-store failures degrade to a direct store read (fail-open).
    ///
    /// # Errors
    ///
    /// Surfaces store errors only when both the cache and the source
    /// stores fail.
    pub async fn get(&self) -> Result<SchemaCatalog> {
        match self.fast.get_json(&self.cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(catalog) = serde_json::from_value::<SchemaCatalog>(cached) {
                    return Ok(catalog);
                }
                tracing::warn!("cached schema catalog is malformed, rebuilding");
            },
            Ok(None) => {},
            Err(error) => {
                tracing::warn!(%error, "schema catalog cache read failed, rebuilding");
            },
        }
        self.refresh().await
    }

    /// Rebuild the catalog from both stores and overwrite the cache.
    ///
    /// A store that cannot be reached contributes no tables rather than
    /// failing the whole materialization; the canvas keeps working with
    /// whatever half of the world is up.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice; kept fallible for future source
    /// stores whose absence should surface.
    pub async fn refresh(&self) -> Result<SchemaCatalog> {
        let mut tables = Vec::new();

        match self.analytical.fetch_catalog().await {
            Ok(mut fetched) => tables.append(&mut fetched),
            Err(error) => tracing::warn!(%error, "analytical catalog fetch failed"),
        }
        match self.live.fetch_catalog().await {
            Ok(mut fetched) => tables.append(&mut fetched),
            Err(error) => tracing::warn!(%error, "live catalog fetch failed"),
        }

        let catalog = SchemaCatalog {
            tables,
            refreshed_at: Utc::now(),
        };

        if let Ok(serialized) = serde_json::to_value(&catalog) {
            if let Err(error) = self.fast.set_json(&self.cache_key, &serialized, self.ttl_secs).await
            {
                tracing::warn!(%error, "schema catalog cache write failed");
            }
        }

        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytical_native_mapping() {
        assert_eq!(dtype_from_native(StoreName::Analytical, "UInt64"), Dtype::Int64);
        assert_eq!(dtype_from_native(StoreName::Analytical, "Nullable(Float32)"), Dtype::Float64);
        assert_eq!(dtype_from_native(StoreName::Analytical, "Decimal(18, 4)"), Dtype::Float64);
        assert_eq!(dtype_from_native(StoreName::Analytical, "DateTime64(3)"), Dtype::Datetime);
        assert_eq!(dtype_from_native(StoreName::Analytical, "Date"), Dtype::Datetime);
        assert_eq!(dtype_from_native(StoreName::Analytical, "Bool"), Dtype::Bool);
        assert_eq!(dtype_from_native(StoreName::Analytical, "LowCardinality(String)"), Dtype::String);
    }

    #[test]
    fn test_live_native_mapping() {
        assert_eq!(dtype_from_native(StoreName::Live, "bigint"), Dtype::Int64);
        assert_eq!(dtype_from_native(StoreName::Live, "numeric"), Dtype::Float64);
        assert_eq!(dtype_from_native(StoreName::Live, "timestamp with time zone"), Dtype::Datetime);
        assert_eq!(dtype_from_native(StoreName::Live, "boolean"), Dtype::Bool);
        assert_eq!(dtype_from_native(StoreName::Live, "text"), Dtype::String);
    }

    #[test]
    fn test_catalog_table_freshness_defaults() {
        let analytical = CatalogTable::new("fct_trades", StoreName::Analytical);
        assert_eq!(analytical.freshness, "analytical");
        let live = CatalogTable::new("positions", StoreName::Live);
        assert_eq!(live.freshness, "realtime");
    }
}
