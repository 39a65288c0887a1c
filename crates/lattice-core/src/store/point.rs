//! Point store client: exact-key lookups.
//!
//! Point segments carry no SQL, only the keys to fetch. Results are shaped
//! as `{key, value}` rows; values that parse as JSON are surfaced parsed so
//! KPI widgets can address fields without a second decode.

use serde_json::{Map, Value};

use lattice_error::RouterError;

use crate::graph::Dtype;
use crate::route::{ColumnMeta, QueryResult};
use crate::sql::BoundParam;

const STORE: &str = "point";

/// Exact-key lookup client over the fast store's keyspace.
pub struct PointStore {
    connection: redis::aio::ConnectionManager,
}

impl PointStore {
    /// Wrap an established fast-store connection.
    #[must_use]
    pub fn new(connection: redis::aio::ConnectionManager) -> Self {
        Self { connection }
    }

    /// Fetch the segment's keys and shape a two-column result. Missing
    /// keys yield no row.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the store cannot be reached.
    pub async fn lookup(&self, params: &[BoundParam]) -> Result<QueryResult, RouterError> {
        let keys: Vec<String> = params
            .iter()
            .filter_map(|p| p.value.as_str().map(str::to_string))
            .collect();

        let mut connection = self.connection.clone();
        let mut rows: Vec<Map<String, Value>> = Vec::with_capacity(keys.len());

        for key in &keys {
            let value: Option<String> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut connection)
                .await
                .map_err(|e| RouterError::StoreUnavailable {
                    store:  STORE.to_string(),
                    detail: e.to_string(),
                })?;
            if let Some(raw) = value {
                let mut row = Map::with_capacity(2);
                row.insert("key".to_string(), Value::String(key.clone()));
                let parsed = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
                row.insert("value".to_string(), parsed);
                rows.push(row);
            }
        }

        let total_rows = rows.len() as u64;
        Ok(QueryResult {
            columns: vec![
                ColumnMeta {
                    name:  "key".to_string(),
                    dtype: Dtype::String,
                },
                ColumnMeta {
                    name:  "value".to_string(),
                    dtype: Dtype::String,
                },
            ],
            rows,
            total_rows,
            source_store: STORE.to_string(),
        })
    }
}
