//! DuckDB embedded backend driver
//!
//! In-memory or file-backed; validation goes through EXPLAIN with zero
//! cost. The engine is synchronous, so every call runs on the blocking
//! thread pool behind a connection mutex. A timed-out statement cannot be
//! interrupted mid-flight; the blocking task is left to finish and its
//! result is discarded.

use crate::driver::{self, BackendError, OmopBackend};
use crate::fragments;
use omop_mcp_core::config::DuckDbConfig;
use omop_mcp_core::model::{BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::{SchemaMap, TableInfo};
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DateUnit, DialectOps, SqlDialect};
use std::time::Duration;

#[cfg(feature = "embedded")]
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct DuckDbBackend {
    schema: String,

    #[cfg(feature = "embedded")]
    connection: Arc<Mutex<duckdb::Connection>>,

    #[cfg(not(feature = "embedded"))]
    _phantom: std::marker::PhantomData<()>,
}

impl DuckDbBackend {
    #[cfg(feature = "embedded")]
    pub fn connect(config: &DuckDbConfig) -> Result<Self, BackendError> {
        let connection = if config.path == ":memory:" {
            duckdb::Connection::open_in_memory()
        } else {
            duckdb::Connection::open(&config.path)
        }
        .map_err(|e| BackendError::Unavailable(format!("failed to open DuckDB: {e}")))?;

        Ok(Self {
            schema: config.schema.clone(),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    #[cfg(not(feature = "embedded"))]
    pub fn connect(config: &DuckDbConfig) -> Result<Self, BackendError> {
        let _ = config;
        Err(BackendError::Config(
            "DuckDB support not compiled. Rebuild with: cargo build --features embedded"
                .to_string(),
        ))
    }

    /// Run a statement on the blocking pool and collect every row as JSON
    #[cfg(feature = "embedded")]
    async fn run(&self, sql: String) -> Result<Vec<Row>, BackendError> {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let connection = connection.lock().expect("duckdb lock poisoned");
            let mut stmt = connection
                .prepare(&sql)
                .map_err(|e| BackendError::Query(e.to_string()))?;
            let mut rows = stmt
                .query([])
                .map_err(|e| BackendError::Query(e.to_string()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(|e| BackendError::Query(e.to_string()))? {
                let names = row.as_ref().column_names();
                let mut json_row = Row::new();
                for (idx, name) in names.iter().enumerate() {
                    let value: duckdb::types::Value = row
                        .get(idx)
                        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
                    json_row.insert(name.clone(), to_json(value));
                }
                out.push(json_row);
            }
            Ok(out)
        })
        .await
        .map_err(|e| BackendError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

#[cfg(feature = "embedded")]
fn to_json(value: duckdb::types::Value) -> serde_json::Value {
    use duckdb::types::Value;
    use serde_json::json;

    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => json!(b),
        Value::TinyInt(v) => json!(v),
        Value::SmallInt(v) => json!(v),
        Value::Int(v) => json!(v),
        Value::BigInt(v) => json!(v),
        Value::HugeInt(v) => json!(v.to_string()),
        Value::UTinyInt(v) => json!(v),
        Value::USmallInt(v) => json!(v),
        Value::UInt(v) => json!(v),
        Value::UBigInt(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::Decimal(d) => json!(d.to_string()),
        Value::Text(s) => json!(s),
        Value::Date32(days) => json!(days),
        other => json!(format!("{other:?}")),
    }
}

impl DialectOps for DuckDbBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::DuckDb
    }

    fn qualified_table(&self, table: &str) -> String {
        // Bare names in the default schema, qualified otherwise
        if self.schema == "main" {
            table.to_string()
        } else {
            format!("{}.{}", self.schema, table)
        }
    }

    fn age_expression(&self, birth_column: &str) -> String {
        fragments::age_expression(SqlDialect::DuckDb, birth_column)
    }

    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String {
        fragments::date_diff_expression(SqlDialect::DuckDb, unit, start, end)
    }
}

#[async_trait::async_trait]
impl OmopBackend for DuckDbBackend {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn status(&self) -> BackendStatus {
        BackendStatus::Live
    }

    fn features(&self) -> Vec<BackendFeature> {
        vec![
            BackendFeature::Explain,
            BackendFeature::Execute,
            BackendFeature::Translate,
            BackendFeature::Local,
        ]
    }

    #[cfg(feature = "embedded")]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        let sql = format!(
            "SELECT table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = '{}' \
             ORDER BY table_name, ordinal_position",
            self.schema
        );

        let rows = self.run(sql).await?;
        let mut schema = SchemaMap::new();
        for row in rows {
            let table = row
                .get("table_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_lowercase();
            let column = row
                .get("column_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_lowercase();
            let data_type = row
                .get("data_type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_uppercase();
            if table.is_empty() || column.is_empty() {
                continue;
            }
            let info: &mut TableInfo = schema.entry(table).or_default();
            if data_type == "DATE" || data_type.starts_with("TIMESTAMP") {
                info.date_columns.push(column.clone());
            }
            info.columns.push(column);
        }
        Ok(schema)
    }

    #[cfg(not(feature = "embedded"))]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        Err(BackendError::Config(
            "DuckDB support not compiled. Rebuild with: cargo build --features embedded"
                .to_string(),
        ))
    }

    #[cfg(feature = "embedded")]
    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError> {
        driver::guard_read_only(sql, self)?;

        match self.run(format!("EXPLAIN {sql}")).await {
            Ok(_) => Ok(SqlValidationResult::valid(0, 0.0)),
            Err(BackendError::Query(message)) => Ok(SqlValidationResult::invalid(message)),
            Err(other) => Err(other),
        }
    }

    #[cfg(not(feature = "embedded"))]
    async fn validate(&self, _sql: &str) -> Result<SqlValidationResult, BackendError> {
        Err(BackendError::Config(
            "DuckDB support not compiled. Rebuild with: cargo build --features embedded"
                .to_string(),
        ))
    }

    #[cfg(feature = "embedded")]
    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        let prepared = driver::prepare_execute(sql, self, row_limit)?;

        let mut rows = tokio::time::timeout(timeout, self.run(prepared))
            .await
            .map_err(|_| BackendError::Timeout(timeout.as_secs()))??;
        rows.truncate(row_limit);
        Ok(rows)
    }

    #[cfg(not(feature = "embedded"))]
    async fn execute(
        &self,
        _sql: &str,
        _row_limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::Config(
            "DuckDB support not compiled. Rebuild with: cargo build --features embedded"
                .to_string(),
        ))
    }
}
