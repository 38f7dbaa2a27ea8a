//! Mock backend driver for testing
//!
//! Returns canned validation results, rows, and schemas without connecting
//! to any warehouse, and records every SQL string it is asked to validate
//! or execute so tests can assert on warehouse round-trips (or their
//! absence). The read-only guard runs exactly as in the real drivers:
//! a mutation statement is rejected before it is recorded.

use crate::driver::{self, BackendError, OmopBackend};
use crate::fragments;
use omop_mcp_core::model::{BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::SchemaMap;
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DateUnit, DialectOps, SqlDialect};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug)]
pub struct MockBackend {
    name: &'static str,
    dialect: SqlDialect,
    status: BackendStatus,
    features: Vec<BackendFeature>,
    database: String,
    dataset: String,
    validation: Arc<RwLock<SqlValidationResult>>,
    rows: Arc<RwLock<Vec<Row>>>,
    tables: Arc<RwLock<SchemaMap>>,
    validate_error: Arc<RwLock<Option<BackendError>>>,
    execute_error: Arc<RwLock<Option<BackendError>>>,
    validated: Arc<Mutex<Vec<String>>>,
    executed: Arc<Mutex<Vec<String>>>,
    latency: Duration,
}

impl MockBackend {
    pub fn builder(name: &'static str, dialect: SqlDialect) -> MockBackendBuilder {
        MockBackendBuilder::new(name, dialect)
    }

    /// SQL strings that reached `validate`
    pub fn validated_sql(&self) -> Vec<String> {
        self.validated.lock().expect("mock lock").clone()
    }

    /// SQL strings that reached `execute` past the guard
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().expect("mock lock").clone()
    }

    pub fn execute_count(&self) -> usize {
        self.executed.lock().expect("mock lock").len()
    }

    pub fn validate_count(&self) -> usize {
        self.validated.lock().expect("mock lock").len()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Clone for MockBackend {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            dialect: self.dialect,
            status: self.status,
            features: self.features.clone(),
            database: self.database.clone(),
            dataset: self.dataset.clone(),
            validation: Arc::clone(&self.validation),
            rows: Arc::clone(&self.rows),
            tables: Arc::clone(&self.tables),
            validate_error: Arc::clone(&self.validate_error),
            execute_error: Arc::clone(&self.execute_error),
            validated: Arc::clone(&self.validated),
            executed: Arc::clone(&self.executed),
            latency: self.latency,
        }
    }
}

impl DialectOps for MockBackend {
    fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn qualified_table(&self, table: &str) -> String {
        match self.dialect {
            SqlDialect::BigQuery => format!("`{}.{}.{}`", self.database, self.dataset, table),
            SqlDialect::Snowflake => format!("{}.{}.{}", self.database, self.dataset, table),
            SqlDialect::Postgres => format!("{}.{}", self.dataset, table),
            SqlDialect::DuckDb | SqlDialect::Generic => table.to_string(),
        }
    }

    fn age_expression(&self, birth_column: &str) -> String {
        fragments::age_expression(self.dialect, birth_column)
    }

    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String {
        fragments::date_diff_expression(self.dialect, unit, start, end)
    }

    fn supports_qualify(&self) -> bool {
        fragments::supports_qualify(self.dialect)
    }
}

#[async_trait::async_trait]
impl OmopBackend for MockBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn status(&self) -> BackendStatus {
        self.status
    }

    fn features(&self) -> Vec<BackendFeature> {
        self.features.clone()
    }

    async fn list_tables(&self) -> Result<SchemaMap, BackendError> {
        Ok(self.tables.read().expect("mock lock").clone())
    }

    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError> {
        driver::guard_read_only(sql, self)?;
        self.validated
            .lock()
            .expect("mock lock")
            .push(sql.to_string());

        if let Some(error) = self.validate_error.read().expect("mock lock").clone() {
            return Err(error);
        }
        Ok(self.validation.read().expect("mock lock").clone())
    }

    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError> {
        let prepared = driver::prepare_execute(sql, self, row_limit)?;
        if self.latency > timeout {
            return Err(BackendError::Timeout(timeout.as_secs()));
        }
        self.simulate_latency().await;
        self.executed.lock().expect("mock lock").push(prepared);

        if let Some(error) = self.execute_error.read().expect("mock lock").clone() {
            return Err(error);
        }

        let rows = self.rows.read().expect("mock lock");
        Ok(rows.iter().take(row_limit).cloned().collect())
    }
}

pub struct MockBackendBuilder {
    inner: MockBackend,
}

impl MockBackendBuilder {
    fn new(name: &'static str, dialect: SqlDialect) -> Self {
        Self {
            inner: MockBackend {
                name,
                dialect,
                status: BackendStatus::Live,
                features: vec![
                    BackendFeature::DryRun,
                    BackendFeature::CostEstimate,
                    BackendFeature::Execute,
                    BackendFeature::Translate,
                ],
                database: "proj".to_string(),
                dataset: "cdm".to_string(),
                validation: Arc::new(RwLock::new(SqlValidationResult::valid(0, 0.0))),
                rows: Arc::new(RwLock::new(Vec::new())),
                tables: Arc::new(RwLock::new(SchemaMap::new())),
                validate_error: Arc::new(RwLock::new(None)),
                execute_error: Arc::new(RwLock::new(None)),
                validated: Arc::new(Mutex::new(Vec::new())),
                executed: Arc::new(Mutex::new(Vec::new())),
                latency: Duration::ZERO,
            },
        }
    }

    /// Database/dataset used by `qualified_table`
    pub fn with_dataset(mut self, database: impl Into<String>, dataset: impl Into<String>) -> Self {
        self.inner.database = database.into();
        self.inner.dataset = dataset.into();
        self
    }

    pub fn with_status(mut self, status: BackendStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn with_features(mut self, features: Vec<BackendFeature>) -> Self {
        self.inner.features = features;
        self
    }

    /// Canned result returned by `validate`
    pub fn with_validation(self, validation: SqlValidationResult) -> Self {
        *self.inner.validation.write().expect("mock lock") = validation;
        self
    }

    /// Canned rows returned by `execute`
    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        *self.inner.rows.write().expect("mock lock") = rows;
        self
    }

    /// Live schema returned by `list_tables`
    pub fn with_tables(self, tables: SchemaMap) -> Self {
        *self.inner.tables.write().expect("mock lock") = tables;
        self
    }

    pub fn with_validate_error(self, error: BackendError) -> Self {
        *self.inner.validate_error.write().expect("mock lock") = Some(error);
        self
    }

    pub fn with_execute_error(self, error: BackendError) -> Self {
        *self.inner.execute_error.write().expect("mock lock") = Some(error);
        self
    }

    /// Simulated execution latency. Validation and discovery stay instant,
    /// matching the contract that only execute may hold a connection long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.inner.latency = latency;
        self
    }

    pub fn build(self) -> MockBackend {
        self.inner
    }
}

/// Build a row from (column, value) pairs, keeping insertion order
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    let mut row = Row::new();
    for (key, value) in pairs {
        row.insert(key.to_string(), value.clone());
    }
    row
}
