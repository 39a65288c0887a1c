//! Analytical store client: SQL over HTTP.
//!
//! The store exposes an HTTP endpoint accepting a SQL statement in the
//! request body and returning the JSON result format
//! `{meta: [{name, type}], data: [...], rows: n}`. Parameters travel as
//! `param_<name>` request parameters matching the statement's `{name:Type}`
//! typed placeholders; values are never interpolated into the SQL text.

use serde::Deserialize;
use serde_json::{Map, Value};

use lattice_error::RouterError;

use crate::config::AnalyticalStoreConfig;
use crate::route::{ColumnMeta, QueryResult};
use crate::schema::{dtype_from_native, CatalogTable, StoreName};
use crate::sql::BoundParam;

const STORE: &str = "analytical";

/// Read-only HTTP SQL client for the analytical store.
pub struct AnalyticalStore {
    http:     reqwest::Client,
    url:      String,
    database: String,
    user:     String,
    password: String,
}

/// JSON result format envelope.
#[derive(Debug, Deserialize)]
struct JsonResult {
    #[serde(default)]
    meta: Vec<JsonResultColumn>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
    #[serde(default)]
    rows: u64,
}

#[derive(Debug, Deserialize)]
struct JsonResultColumn {
    name:       String,
    #[serde(rename = "type")]
    native_type: String,
}

impl AnalyticalStore {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::StoreUnavailable` if the HTTP client cannot be
    /// constructed.
    pub fn new(config: &AnalyticalStoreConfig) -> Result<Self, RouterError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RouterError::StoreUnavailable {
                store:  STORE.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            url: config.url.clone(),
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Execute a statement and shape the JSON result.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` for transport failures, `QueryFailed` for
    /// non-success responses or malformed result bodies.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[BoundParam],
    ) -> Result<QueryResult, RouterError> {
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), self.database.clone()),
            ("default_format".to_string(), "JSON".to_string()),
        ];
        for param in params {
            query.push((format!("param_{}", param.name), param_value(&param.value)));
        }

        let response = self
            .http
            .post(&self.url)
            .query(&query)
            .basic_auth(&self.user, Some(&self.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| RouterError::StoreUnavailable {
                store:  STORE.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RouterError::QueryFailed {
                store:  STORE.to_string(),
                detail: format!("{status}: {detail}"),
            });
        }

        let body: JsonResult =
            response.json().await.map_err(|e| RouterError::QueryFailed {
                store:  STORE.to_string(),
                detail: format!("malformed result body: {e}"),
            })?;

        let columns = body
            .meta
            .iter()
            .map(|col| ColumnMeta {
                name:  col.name.clone(),
                dtype: dtype_from_native(StoreName::Analytical, &col.native_type),
            })
            .collect();

        let total_rows = if body.rows > 0 { body.rows } else { body.data.len() as u64 };
        Ok(QueryResult {
            columns,
            rows: body.data,
            total_rows,
            source_store: STORE.to_string(),
        })
    }

    /// Read the system catalog: every table and column in the configured
    /// database, with native types mapped to engine dtypes on ingress.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::execute`].
    pub async fn fetch_catalog(&self) -> Result<Vec<CatalogTable>, RouterError> {
        let sql = "SELECT table, name, type FROM system.columns \
                   WHERE database = {db:String} ORDER BY table, position";
        let params = [BoundParam {
            name:  "db".to_string(),
            dtype: crate::graph::Dtype::String,
            value: Value::String(self.database.clone()),
        }];
        let result = self.execute(sql, &params).await?;

        let mut tables: Vec<CatalogTable> = Vec::new();
        for row in &result.rows {
            let table = row.get("table").and_then(Value::as_str).unwrap_or_default();
            let column = row.get("name").and_then(Value::as_str).unwrap_or_default();
            let native = row.get("type").and_then(Value::as_str).unwrap_or_default();
            if table.is_empty() || column.is_empty() {
                continue;
            }
            if tables.last().is_none_or(|t| t.name != table) {
                tables.push(CatalogTable::new(table, StoreName::Analytical));
            }
            if let Some(entry) = tables.last_mut() {
                entry.push_native_column(column, native);
            }
        }
        Ok(tables)
    }

    /// Connectivity probe.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the store is unreachable or unhealthy.
    pub async fn ping(&self) -> Result<(), RouterError> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Wire form of a parameter value for `param_<name>`.
fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::graph::Dtype;

    use super::*;

    fn store(url: &str) -> AnalyticalStore {
        AnalyticalStore::new(&AnalyticalStoreConfig {
            url: url.to_string(),
            ..AnalyticalStoreConfig::default()
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn test_execute_shapes_json_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("default_format", "JSON"))
            .and(query_param("param_p0", "AAPL"))
            .and(body_string_contains("SELECT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": [
                    {"name": "symbol", "type": "String"},
                    {"name": "price", "type": "Float64"},
                    {"name": "quantity", "type": "UInt64"}
                ],
                "data": [
                    {"symbol": "AAPL", "price": 151.0, "quantity": 10}
                ],
                "rows": 1
            })))
            .mount(&server)
            .await;

        let result = store(&server.uri())
            .execute(
                "SELECT * FROM \"fct_trades\" WHERE (\"symbol\" = {p0:String})",
                &[BoundParam {
                    name:  "p0".to_string(),
                    dtype: Dtype::String,
                    value: json!("AAPL"),
                }],
            )
            .await
            .expect("executes");

        assert_eq!(result.total_rows, 1);
        assert_eq!(result.columns[1].dtype, Dtype::Float64);
        assert_eq!(result.columns[2].dtype, Dtype::Int64, "UInt64 maps to int64 on ingress");
        assert_eq!(result.rows[0]["symbol"], json!("AAPL"));
        assert_eq!(result.source_store, "analytical");
    }

    #[tokio::test]
    async fn test_http_error_maps_to_query_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Syntax error: line 1"))
            .mount(&server)
            .await;

        let err = store(&server.uri())
            .execute("SELECT broken", &[])
            .await
            .expect_err("must fail");
        let RouterError::QueryFailed { detail, .. } = err else {
            panic!("expected QueryFailed, got {err:?}");
        };
        assert!(detail.contains("Syntax error"));
    }

    #[tokio::test]
    async fn test_unreachable_store_maps_to_unavailable() {
        // Nothing listens on this port.
        let err = store("http://127.0.0.1:1")
            .execute("SELECT 1", &[])
            .await
            .expect_err("must fail");
        assert!(matches!(err, RouterError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_catalog_groups_by_table() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": [
                    {"name": "table", "type": "String"},
                    {"name": "name", "type": "String"},
                    {"name": "type", "type": "String"}
                ],
                "data": [
                    {"table": "fct_trades", "name": "symbol", "type": "String"},
                    {"table": "fct_trades", "name": "price", "type": "Float64"},
                    {"table": "dim_instruments", "name": "symbol", "type": "String"}
                ],
                "rows": 3
            })))
            .mount(&server)
            .await;

        let tables = store(&server.uri()).fetch_catalog().await.expect("fetches");
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "fct_trades");
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[1].columns.len(), 1);
    }
}
