//! Snowflake backend driver
//!
//! Validation goes through EXPLAIN and reports zero cost; results arrive as
//! Arrow record batches and are flattened into JSON rows. Requires USAGE on
//! the database and schema plus SELECT on the queried tables.

use crate::driver::{self, BackendError, OmopBackend};
use crate::fragments;
use omop_mcp_core::config::SnowflakeConfig;
use omop_mcp_core::model::{BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::{SchemaMap, TableInfo};
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DateUnit, DialectOps, SqlDialect};
use std::time::Duration;

#[cfg(feature = "snowflake")]
use snowflake_api::{QueryResult, SnowflakeApi};

#[derive(Debug)]
pub struct SnowflakeBackend {
    database: String,
    schema: String,

    #[cfg(feature = "snowflake")]
    api: SnowflakeApi,

    #[cfg(not(feature = "snowflake"))]
    _phantom: std::marker::PhantomData<()>,
}

impl SnowflakeBackend {
    #[cfg(feature = "snowflake")]
    pub fn connect(config: &SnowflakeConfig) -> Result<Self, BackendError> {
        if config.account.is_empty() || config.user.is_empty() {
            return Err(BackendError::Config(
                "snowflake.account and snowflake.user must be set".to_string(),
            ));
        }

        let api = SnowflakeApi::with_password_auth(
            &config.account,
            Some(&config.warehouse),
            Some(&config.database),
            Some(&config.schema),
            &config.user,
            None,
            &config.password,
        )
        .map_err(|e| {
            BackendError::Authentication(format!("Snowflake authentication failed: {e}"))
        })?;

        Ok(Self {
            database: config.database.clone(),
            schema: config.schema.clone(),
            api,
        })
    }

    #[cfg(not(feature = "snowflake"))]
    pub fn connect(config: &SnowflakeConfig) -> Result<Self, BackendError> {
        let _ = config;
        Err(BackendError::Config(
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake"
                .to_string(),
        ))
    }

    #[cfg(feature = "snowflake")]
    async fn run(&self, sql: &str) -> Result<Vec<Row>, BackendError> {
        let result = self.api.exec(sql).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("Insufficient privileges") || message.contains("Authentication") {
                BackendError::Authentication(message)
            } else {
                BackendError::Query(message)
            }
        })?;

        match result {
            QueryResult::Arrow(batches) => arrow::batches_to_rows(&batches),
            QueryResult::Json(json) => Err(BackendError::InvalidResponse(format!(
                "unexpected JSON result format: {}",
                json.value
            ))),
            QueryResult::Empty => Ok(Vec::new()),
        }
    }
}

impl DialectOps for SnowflakeBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Snowflake
    }

    fn qualified_table(&self, table: &str) -> String {
        format!("{}.{}.{}", self.database, self.schema, table)
    }

    fn age_expression(&self, birth_column: &str) -> String {
        fragments::age_expression(SqlDialect::Snowflake, birth_column)
    }

    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String {
        fragments::date_diff_expression(SqlDialect::Snowflake, unit, start, end)
    }

    fn supports_qualify(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
impl OmopBackend for SnowflakeBackend {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn status(&self) -> BackendStatus {
        BackendStatus::Live
    }

    fn features(&self) -> Vec<BackendFeature> {
        vec![
            BackendFeature::Explain,
            BackendFeature::Execute,
            BackendFeature::Translate,
        ]
    }

    #[cfg(feature = "snowflake")]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        // Snowflake stores unquoted identifiers uppercase
        let query = format!(
            "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE \
             FROM {}.INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
            self.database,
            self.schema.to_uppercase()
        );

        let rows = self.run(&query).await?;
        let mut schema = SchemaMap::new();
        for row in rows {
            let table = string_field(&row, "TABLE_NAME");
            let column = string_field(&row, "COLUMN_NAME").to_lowercase();
            let data_type = string_field(&row, "DATA_TYPE");
            if table.is_empty() || column.is_empty() {
                continue;
            }
            let info: &mut TableInfo = schema.entry(table.to_lowercase()).or_default();
            if matches!(
                data_type.as_str(),
                "DATE" | "DATETIME" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ"
            ) {
                info.date_columns.push(column.clone());
            }
            info.columns.push(column);
        }
        Ok(schema)
    }

    #[cfg(not(feature = "snowflake"))]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        Err(BackendError::Config(
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake"
                .to_string(),
        ))
    }

    #[cfg(feature = "snowflake")]
    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError> {
        driver::guard_read_only(sql, self)?;

        match self.run(&format!("EXPLAIN {sql}")).await {
            Ok(_) => Ok(SqlValidationResult::valid(0, 0.0)),
            Err(BackendError::Query(message)) => Ok(SqlValidationResult::invalid(message)),
            Err(other) => Err(other),
        }
    }

    #[cfg(not(feature = "snowflake"))]
    async fn validate(&self, _sql: &str) -> Result<SqlValidationResult, BackendError> {
        Err(BackendError::Config(
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake"
                .to_string(),
        ))
    }

    #[cfg(feature = "snowflake")]
    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        let prepared = driver::prepare_execute(sql, self, row_limit)?;

        let mut rows = tokio::time::timeout(timeout, self.run(&prepared))
            .await
            .map_err(|_| BackendError::Timeout(timeout.as_secs()))??;
        rows.truncate(row_limit);
        Ok(rows)
    }

    #[cfg(not(feature = "snowflake"))]
    async fn execute(
        &self,
        _sql: &str,
        _row_limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::Config(
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake"
                .to_string(),
        ))
    }
}

#[cfg(feature = "snowflake")]
fn string_field(row: &Row, name: &str) -> String {
    row.get(name)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Arrow record batch flattening
#[cfg(feature = "snowflake")]
mod arrow {
    use super::{BackendError, Row};
    use arrow_array::array::Array;
    use arrow_array::cast::AsArray;
    use arrow_array::types::{
        Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    };
    use arrow_array::RecordBatch;
    use arrow_schema::DataType;
    use serde_json::Value;

    pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>, BackendError> {
        let mut rows = Vec::new();
        for batch in batches {
            let schema = batch.schema();
            for row_idx in 0..batch.num_rows() {
                let mut row = Row::new();
                for (col_idx, field) in schema.fields().iter().enumerate() {
                    let value = cell_value(batch.column(col_idx).as_ref(), row_idx);
                    row.insert(field.name().clone(), value);
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn cell_value(array: &dyn Array, idx: usize) -> Value {
        if array.is_null(idx) {
            return Value::Null;
        }
        match array.data_type() {
            DataType::Utf8 => Value::String(array.as_string::<i32>().value(idx).to_string()),
            DataType::LargeUtf8 => {
                Value::String(array.as_string::<i64>().value(idx).to_string())
            }
            DataType::Boolean => Value::Bool(array.as_boolean().value(idx)),
            DataType::Int8 => array.as_primitive::<Int8Type>().value(idx).into(),
            DataType::Int16 => array.as_primitive::<Int16Type>().value(idx).into(),
            DataType::Int32 => array.as_primitive::<Int32Type>().value(idx).into(),
            DataType::Int64 => array.as_primitive::<Int64Type>().value(idx).into(),
            DataType::Float32 => array.as_primitive::<Float32Type>().value(idx).into(),
            DataType::Float64 => array.as_primitive::<Float64Type>().value(idx).into(),
            DataType::Date32 => {
                // Days since epoch; render as the day count
                array.as_primitive::<Date32Type>().value(idx).into()
            }
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "snowflake"))]
    #[test]
    fn connect_without_sdk_reports_rebuild_flag() {
        let err = SnowflakeBackend::connect(&SnowflakeConfig::default()).unwrap_err();
        match err {
            BackendError::Config(message) => assert!(message.contains("--features snowflake")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
