//! BigQuery backend driver
//!
//! Validation uses the native dry-run, which reports bytes processed;
//! estimated cost is bytes times the configured on-demand price per TB.
//! Schema discovery queries the dataset's INFORMATION_SCHEMA.COLUMNS view.
//!
//! ## Authentication
//!
//! 1. Service account JSON file (path in `bigquery.credentials`)
//! 2. Inline service account JSON (same field)
//! 3. Application Default Credentials when the field is absent

use crate::driver::{self, BackendError, OmopBackend};
use crate::fragments;
use omop_mcp_core::config::BigQueryConfig;
use omop_mcp_core::model::{BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::{SchemaMap, TableInfo};
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DateUnit, DialectOps, SqlDialect};
use std::time::Duration;

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    model::query_request::QueryRequest, model::query_response::ResultSet, Client as BigQueryClient,
};

const BYTES_PER_TB: f64 = 1e12;

#[derive(Debug)]
pub struct BigQueryBackend {
    project: String,
    dataset: String,
    price_per_tb_usd: f64,

    #[cfg(feature = "bigquery")]
    client: BigQueryClient,

    #[cfg(not(feature = "bigquery"))]
    _phantom: std::marker::PhantomData<()>,
}

impl BigQueryBackend {
    #[cfg(feature = "bigquery")]
    pub async fn connect(config: &BigQueryConfig) -> Result<Self, BackendError> {
        if config.project.is_empty() || config.dataset.is_empty() {
            return Err(BackendError::Config(
                "bigquery.project and bigquery.dataset must be set".to_string(),
            ));
        }

        let client = match &config.credentials {
            None => BigQueryClient::from_application_default_credentials()
                .await
                .map_err(|e| {
                    BackendError::Authentication(format!(
                        "ADC authentication failed: {e}. Set GOOGLE_APPLICATION_CREDENTIALS \
                         or run 'gcloud auth application-default login'"
                    ))
                })?,
            Some(credentials) if credentials.trim_start().starts_with('{') => {
                let sa_key: gcp_bigquery_client::yup_oauth2::ServiceAccountKey =
                    serde_json::from_str(credentials).map_err(|e| {
                        BackendError::Config(format!("invalid service account JSON: {e}"))
                    })?;
                BigQueryClient::from_service_account_key(sa_key, false)
                    .await
                    .map_err(|e| {
                        BackendError::Authentication(format!(
                            "service account authentication failed: {e}"
                        ))
                    })?
            }
            Some(path) => BigQueryClient::from_service_account_key_file(path)
                .await
                .map_err(|e| {
                    BackendError::Authentication(format!(
                        "failed to read service account key file '{path}': {e}"
                    ))
                })?,
        };

        Ok(Self {
            project: config.project.clone(),
            dataset: config.dataset.clone(),
            price_per_tb_usd: config.price_per_tb_usd,
            client,
        })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn connect(config: &BigQueryConfig) -> Result<Self, BackendError> {
        let _ = config;
        Err(BackendError::Config(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery"
                .to_string(),
        ))
    }

    /// Dry-run cost from a byte count
    fn cost_for_bytes(&self, bytes: u64) -> f64 {
        bytes as f64 / BYTES_PER_TB * self.price_per_tb_usd
    }

    #[cfg(feature = "bigquery")]
    fn classify_error(error: String) -> BackendError {
        if error.contains("Access Denied")
            || error.contains("Unauthorized")
            || error.contains("invalid_grant")
        {
            BackendError::Authentication(error)
        } else if error.contains("Not found") {
            BackendError::Query(error)
        } else {
            BackendError::Query(error)
        }
    }
}

impl DialectOps for BigQueryBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::BigQuery
    }

    fn qualified_table(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }

    fn age_expression(&self, birth_column: &str) -> String {
        fragments::age_expression(SqlDialect::BigQuery, birth_column)
    }

    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String {
        fragments::date_diff_expression(SqlDialect::BigQuery, unit, start, end)
    }

    fn supports_qualify(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
impl OmopBackend for BigQueryBackend {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn status(&self) -> BackendStatus {
        BackendStatus::Live
    }

    fn features(&self) -> Vec<BackendFeature> {
        vec![
            BackendFeature::DryRun,
            BackendFeature::CostEstimate,
            BackendFeature::Execute,
            BackendFeature::Translate,
        ]
    }

    #[cfg(feature = "bigquery")]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        let query = format!(
            "SELECT table_name, column_name, data_type \
             FROM `{}.{}.INFORMATION_SCHEMA.COLUMNS` \
             ORDER BY table_name, ordinal_position",
            self.project, self.dataset
        );

        let response = self
            .client
            .job()
            .query(&self.project, QueryRequest::new(query))
            .await
            .map_err(|e| Self::classify_error(e.to_string()))?;

        let mut schema = SchemaMap::new();
        let mut rs = ResultSet::new_from_query_response(response);
        while rs.next_row() {
            let table = rs
                .get_string_by_name("table_name")
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
                .unwrap_or_default();
            let column = rs
                .get_string_by_name("column_name")
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
                .unwrap_or_default();
            let data_type = rs
                .get_string_by_name("data_type")
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
                .unwrap_or_default();

            let info: &mut TableInfo = schema.entry(table.to_lowercase()).or_default();
            let column = column.to_lowercase();
            if matches!(data_type.as_str(), "DATE" | "DATETIME" | "TIMESTAMP") {
                info.date_columns.push(column.clone());
            }
            info.columns.push(column);
        }
        Ok(schema)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        Err(BackendError::Config(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery"
                .to_string(),
        ))
    }

    #[cfg(feature = "bigquery")]
    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError> {
        driver::guard_read_only(sql, self)?;

        let mut request = QueryRequest::new(sql.to_string());
        request.dry_run = Some(true);

        match self.client.job().query(&self.project, request).await {
            Ok(response) => {
                let bytes = response
                    .total_bytes_processed
                    .as_deref()
                    .and_then(|b| b.parse::<u64>().ok())
                    .unwrap_or(0);
                Ok(SqlValidationResult::valid(bytes, self.cost_for_bytes(bytes)))
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("Access Denied") || message.contains("invalid_grant") {
                    Err(BackendError::Authentication(message))
                } else {
                    Ok(SqlValidationResult::invalid(message))
                }
            }
        }
    }

    #[cfg(not(feature = "bigquery"))]
    async fn validate(&self, _sql: &str) -> Result<SqlValidationResult, BackendError> {
        Err(BackendError::Config(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery"
                .to_string(),
        ))
    }

    #[cfg(feature = "bigquery")]
    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        let prepared = driver::prepare_execute(sql, self, row_limit)?;

        let mut request = QueryRequest::new(prepared);
        request.timeout_ms = Some(timeout.as_millis() as i32);
        request.max_results = Some(row_limit as i32);

        let response = tokio::time::timeout(
            timeout,
            self.client.job().query(&self.project, request),
        )
        .await
        .map_err(|_| BackendError::Timeout(timeout.as_secs()))?
        .map_err(|e| Self::classify_error(e.to_string()))?;

        let column_names: Vec<String> = response
            .schema
            .as_ref()
            .and_then(|s| s.fields.as_ref())
            .map(|fields| fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();

        let mut rows = Vec::new();
        let mut rs = ResultSet::new_from_query_response(response);
        while rs.next_row() && rows.len() < row_limit {
            let mut row = Row::new();
            for name in &column_names {
                let value = rs
                    .get_json_value_by_name(name)
                    .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
                    .unwrap_or(serde_json::Value::Null);
                row.insert(name.clone(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn execute(
        &self,
        _sql: &str,
        _row_limit: usize,
        _timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        Err(BackendError::Config(
            "BigQuery support not compiled. Rebuild with: cargo build --features bigquery"
                .to_string(),
        ))
    }
}

#[cfg(not(feature = "bigquery"))]
impl BigQueryBackend {
    /// Offline constructor used when the SDK is not compiled in; dialect
    /// helpers still work so SQL generation can be exercised.
    pub fn offline(config: &BigQueryConfig) -> Self {
        Self {
            project: config.project.clone(),
            dataset: config.dataset.clone(),
            price_per_tb_usd: config.price_per_tb_usd,
            _phantom: std::marker::PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "bigquery"))]
    #[test]
    fn dialect_helpers_without_sdk() {
        let backend = BigQueryBackend::offline(&BigQueryConfig {
            project: "my-project".to_string(),
            dataset: "omop".to_string(),
            credentials: None,
            price_per_tb_usd: 5.0,
        });

        assert_eq!(backend.qualified_table("person"), "`my-project.omop.person`");
        assert_eq!(
            backend.date_diff_expression(DateUnit::Day, "a", "b"),
            "DATE_DIFF(b, a, DAY)"
        );
        assert!(backend.supports_qualify());
    }

    #[cfg(not(feature = "bigquery"))]
    #[test]
    fn cost_follows_configured_price() {
        let backend = BigQueryBackend::offline(&BigQueryConfig {
            project: "p".to_string(),
            dataset: "d".to_string(),
            credentials: None,
            price_per_tb_usd: 6.25,
        });
        // 1 TB at $6.25/TB
        assert!((backend.cost_for_bytes(1_000_000_000_000) - 6.25).abs() < 1e-9);
        assert_eq!(backend.cost_for_bytes(0), 0.0);
    }
}
