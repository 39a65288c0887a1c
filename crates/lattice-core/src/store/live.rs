//! Live store client: PostgreSQL wire protocol.
//!
//! The live store serves incrementally-maintained views over the PG wire
//! protocol with positional parameters. Row values are shaped into JSON
//! objects on ingress so the router's result shape stays uniform.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::{Map, Value};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};

use lattice_error::RouterError;

use crate::config::LiveStoreConfig;
use crate::graph::Dtype;
use crate::route::{ColumnMeta, QueryResult};
use crate::schema::{CatalogTable, StoreName};
use crate::sql::BoundParam;

const STORE: &str = "live";

/// Read-only pooled client for the live store.
pub struct LiveStore {
    pool: Pool,
}

impl LiveStore {
    /// Build a connection pool from configuration. Connections are
    /// established lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::StoreUnavailable` if the pool cannot be built.
    pub fn new(config: &LiveStoreConfig) -> Result<Self, RouterError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password)
            .application_name("lattice");

        let manager = Manager::from_config(pg, NoTls, ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = Pool::builder(manager)
            .max_size(config.pool_max_size)
            .build()
            .map_err(|e| RouterError::StoreUnavailable {
                store:  STORE.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self { pool })
    }

    /// Execute a statement with positional parameters.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when no connection can be obtained,
    /// `QueryFailed` for statement errors.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[BoundParam],
    ) -> Result<QueryResult, RouterError> {
        let client = self.pool.get().await.map_err(|e| RouterError::StoreUnavailable {
            store:  STORE.to_string(),
            detail: e.to_string(),
        })?;

        let owned = bind_params(params);
        let refs: Vec<&(dyn ToSql + Sync)> =
            owned.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

        let rows = client
            .query(sql, &refs)
            .await
            .map_err(|e| RouterError::QueryFailed {
                store:  STORE.to_string(),
                detail: e.to_string(),
            })?;

        let columns: Vec<ColumnMeta> = rows.first().map_or_else(Vec::new, |row| {
            row.columns()
                .iter()
                .map(|col| ColumnMeta {
                    name:  col.name().to_string(),
                    dtype: dtype_from_pg(col.type_()),
                })
                .collect()
        });

        let shaped: Vec<Map<String, Value>> = rows.iter().map(shape_row).collect();
        let total_rows = shaped.len() as u64;
        Ok(QueryResult {
            columns,
            rows: shaped,
            total_rows,
            source_store: STORE.to_string(),
        })
    }

    /// Read the catalog: every public table and column with native types
    /// mapped to engine dtypes on ingress.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::execute`].
    pub async fn fetch_catalog(&self) -> Result<Vec<CatalogTable>, RouterError> {
        let sql = "SELECT table_name, column_name, data_type \
                   FROM information_schema.columns \
                   WHERE table_schema = 'public' \
                   ORDER BY table_name, ordinal_position";
        let result = self.execute(sql, &[]).await?;

        let mut tables: Vec<CatalogTable> = Vec::new();
        for row in &result.rows {
            let table = row.get("table_name").and_then(Value::as_str).unwrap_or_default();
            let column = row.get("column_name").and_then(Value::as_str).unwrap_or_default();
            let native = row.get("data_type").and_then(Value::as_str).unwrap_or_default();
            if table.is_empty() || column.is_empty() {
                continue;
            }
            if tables.last().is_none_or(|t| t.name != table) {
                tables.push(CatalogTable::new(table, StoreName::Live));
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
    /// `StoreUnavailable` when the store is unreachable.
    pub async fn ping(&self) -> Result<(), RouterError> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Convert bound parameters to owned `ToSql` values in placeholder order.
fn bind_params(params: &[BoundParam]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|param| -> Box<dyn ToSql + Sync + Send> {
            match (&param.value, param.dtype) {
                (Value::Bool(b), _) => Box::new(*b),
                (Value::Number(n), Dtype::Int64) => Box::new(n.as_i64().unwrap_or_default()),
                (Value::Number(n), _) => Box::new(n.as_f64().unwrap_or_default()),
                (Value::String(s), Dtype::Datetime) => {
                    match DateTime::parse_from_rfc3339(s) {
                        Ok(ts) => Box::new(ts.with_timezone(&Utc)),
                        Err(_) => Box::new(s.clone()),
                    }
                },
                (Value::String(s), _) => Box::new(s.clone()),
                (other, _) => Box::new(other.to_string()),
            }
        })
        .collect()
}

fn dtype_from_pg(ty: &Type) -> Dtype {
    match *ty {
        Type::BOOL => Dtype::Bool,
        Type::INT2 | Type::INT4 | Type::INT8 => Dtype::Int64,
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => Dtype::Float64,
        Type::TIMESTAMP | Type::TIMESTAMPTZ | Type::DATE => Dtype::Datetime,
        _ => Dtype::String,
    }
}

/// Shape one wire row into a JSON object.
fn shape_row(row: &Row) -> Map<String, Value> {
    let mut object = Map::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => row.try_get::<_, Option<bool>>(index).ok().flatten().map(Value::from),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(index)
                .ok()
                .flatten()
                .map(|v| Value::from(i64::from(v))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(index)
                .ok()
                .flatten()
                .map(|v| Value::from(i64::from(v))),
            Type::INT8 => row.try_get::<_, Option<i64>>(index).ok().flatten().map(Value::from),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(index)
                .ok()
                .flatten()
                .map(|v| Value::from(f64::from(v))),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(index).ok().flatten().map(Value::from),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<DateTime<Utc>>>(index)
                .ok()
                .flatten()
                .map(|ts| Value::String(ts.to_rfc3339())),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(index)
                .ok()
                .flatten()
                .map(|ts| Value::String(ts.and_utc().to_rfc3339())),
            Type::DATE => row
                .try_get::<_, Option<NaiveDate>>(index)
                .ok()
                .flatten()
                .map(|d| Value::String(d.to_string())),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(index)
                .ok()
                .flatten()
                .map(|u| Value::String(u.to_string())),
            Type::JSON | Type::JSONB => {
                row.try_get::<_, Option<Value>>(index).ok().flatten()
            },
            _ => row
                .try_get::<_, Option<String>>(index)
                .ok()
                .flatten()
                .map(Value::String),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    object
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_bind_params_preserve_order_and_types() {
        let params = vec![
            BoundParam {
                name:  "p0".to_string(),
                dtype: Dtype::String,
                value: json!("AAPL"),
            },
            BoundParam {
                name:  "p1".to_string(),
                dtype: Dtype::Int64,
                value: json!(100),
            },
        ];
        let bound = bind_params(&params);
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn test_dtype_from_pg_mapping() {
        assert_eq!(dtype_from_pg(&Type::INT4), Dtype::Int64);
        assert_eq!(dtype_from_pg(&Type::NUMERIC), Dtype::Float64);
        assert_eq!(dtype_from_pg(&Type::TIMESTAMPTZ), Dtype::Datetime);
        assert_eq!(dtype_from_pg(&Type::TEXT), Dtype::String);
        assert_eq!(dtype_from_pg(&Type::BOOL), Dtype::Bool);
    }
}
