//! PostgreSQL backend driver (beta)
//!
//! Tables are schema-qualified, validation goes through EXPLAIN with zero
//! cost, and date arithmetic uses age()/extract. Result rows are fetched
//! through a row_to_json wrapper so arbitrary SELECTs come back as JSON
//! without per-type decoding.

use crate::driver::{self, BackendError, OmopBackend};
use crate::fragments;
use omop_mcp_core::config::PostgresConfig;
use omop_mcp_core::model::{BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::{SchemaMap, TableInfo};
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DateUnit, DialectOps, SqlDialect};
use std::time::Duration;

#[cfg(feature = "postgres")]
use tokio_postgres::{Client, NoTls};

#[derive(Debug)]
pub struct PostgresBackend {
    schema: String,

    #[cfg(feature = "postgres")]
    client: Client,

    #[cfg(not(feature = "postgres"))]
    _phantom: std::marker::PhantomData<()>,
}

impl PostgresBackend {
    #[cfg(feature = "postgres")]
    pub async fn connect(config: &PostgresConfig) -> Result<Self, BackendError> {
        if config.database.is_empty() || config.user.is_empty() {
            return Err(BackendError::Config(
                "postgres.database and postgres.user must be set".to_string(),
            ));
        }

        let conn_str = format!(
            "host={} port={} dbname={} user={} password={}",
            config.host, config.port, config.database, config.user, config.password
        );

        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|e| {
                BackendError::Authentication(format!(
                    "failed to connect to PostgreSQL at {}:{}: {e}",
                    config.host, config.port
                ))
            })?;

        let host = config.host.clone();
        let port = config.port;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error ({host}:{port}): {e}");
            }
        });

        Ok(Self {
            schema: config.schema.clone(),
            client,
        })
    }

    #[cfg(not(feature = "postgres"))]
    pub async fn connect(config: &PostgresConfig) -> Result<Self, BackendError> {
        let _ = config;
        Err(BackendError::Config(
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres"
                .to_string(),
        ))
    }

    #[cfg(feature = "postgres")]
    fn classify_error(error: tokio_postgres::Error) -> BackendError {
        let message = error.to_string();
        if message.contains("permission denied") {
            BackendError::Authentication(message)
        } else {
            BackendError::Query(message)
        }
    }
}

impl DialectOps for PostgresBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn qualified_table(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    fn age_expression(&self, birth_column: &str) -> String {
        fragments::age_expression(SqlDialect::Postgres, birth_column)
    }

    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String {
        fragments::date_diff_expression(SqlDialect::Postgres, unit, start, end)
    }
}

#[async_trait::async_trait]
impl OmopBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn status(&self) -> BackendStatus {
        BackendStatus::Beta
    }

    fn features(&self) -> Vec<BackendFeature> {
        vec![
            BackendFeature::Explain,
            BackendFeature::Execute,
            BackendFeature::Translate,
        ]
    }

    #[cfg(feature = "postgres")]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        let query = "SELECT table_name, column_name, data_type \
                     FROM information_schema.columns \
                     WHERE table_schema = $1 \
                     ORDER BY table_name, ordinal_position";

        let rows = self
            .client
            .query(query, &[&self.schema])
            .await
            .map_err(Self::classify_error)?;

        let mut schema = SchemaMap::new();
        for row in rows {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let data_type: String = row.get(2);

            let info: &mut TableInfo = schema.entry(table.to_lowercase()).or_default();
            let column = column.to_lowercase();
            if data_type.starts_with("timestamp") || data_type == "date" {
                info.date_columns.push(column.clone());
            }
            info.columns.push(column);
        }
        Ok(schema)
    }

    #[cfg(not(feature = "postgres"))]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        Err(BackendError::Config(
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres"
                .to_string(),
        ))
    }

    #[cfg(feature = "postgres")]
    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError> {
        driver::guard_read_only(sql, self)?;

        match self.client.query(&format!("EXPLAIN {sql}"), &[]).await {
            Ok(_) => Ok(SqlValidationResult::valid(0, 0.0)),
            Err(e) => Ok(SqlValidationResult::invalid(e.to_string())),
        }
    }

    #[cfg(not(feature = "postgres"))]
    async fn validate(&self, _sql: &str) -> Result<SqlValidationResult, BackendError> {
        Err(BackendError::Config(
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres"
                .to_string(),
        ))
    }

    #[cfg(feature = "postgres")]
    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        let prepared = driver::prepare_execute(sql, self, row_limit)?;

        // Wrap so every row arrives as one JSON document
        let wrapped = format!("SELECT row_to_json(q)::text FROM ({prepared}) q");

        let cancel_token = self.client.cancel_token();
        let result = tokio::time::timeout(timeout, self.client.query(&wrapped, &[])).await;

        let pg_rows = match result {
            Ok(rows) => rows.map_err(Self::classify_error)?,
            Err(_) => {
                // Driver-native cancel of the in-flight statement
                if let Err(e) = cancel_token.cancel_query(NoTls).await {
                    tracing::warn!("failed to cancel PostgreSQL statement: {e}");
                }
                return Err(BackendError::Timeout(timeout.as_secs()));
            }
        };

        let mut rows = Vec::with_capacity(pg_rows.len().min(row_limit));
        for pg_row in pg_rows.iter().take(row_limit) {
            let payload: String = pg_row.get(0);
            match serde_json::from_str::<Row>(&payload) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return Err(BackendError::InvalidResponse(format!(
                        "malformed row_to_json payload: {e}"
                    )))
                }
            }
        }
        Ok(rows)
    }

    #[cfg(not(feature = "postgres"))]
    async fn execute(
        &self,
        _sql: &str,
        _row_limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::Config(
            "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn connect_without_sdk_reports_rebuild_flag() {
        let err = PostgresBackend::connect(&PostgresConfig::default())
            .await
            .unwrap_err();
        match err {
            BackendError::Config(message) => assert!(message.contains("--features postgres")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
