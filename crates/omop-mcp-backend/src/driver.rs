//! Driver contract shared by every warehouse backend

use omop_mcp_core::model::{BackendCapability, BackendFeature, BackendStatus, Row};
use omop_mcp_core::omop::SchemaMap;
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::dialect::{DialectOps, SqlDialect};
use omop_mcp_sql::guard::{self, ReadOnlyError, SafetyViolation};
use omop_mcp_sql::translator::{self, DialectError};
use std::time::Duration;

/// Errors a driver can produce
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("SecurityViolation: {0}")]
    Security(String),

    #[error("Execution timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Capability contract every warehouse driver implements.
///
/// Invariants: `execute` never mutates, `validate` never executes, and both
/// are safe to call concurrently from different requests. Connection
/// sharing is each driver's own concern.
#[async_trait::async_trait]
pub trait OmopBackend: DialectOps + Send + Sync + std::fmt::Debug {
    /// Backend name as listed in the registry (e.g. "bigquery")
    fn name(&self) -> &'static str;

    fn status(&self) -> BackendStatus;

    fn features(&self) -> Vec<BackendFeature>;

    fn capability(&self) -> BackendCapability {
        BackendCapability {
            name: self.name().to_string(),
            dialect: self.dialect().as_str().to_string(),
            features: self.features(),
            status: self.status(),
        }
    }

    /// Discover the live schema of the configured dataset
    async fn list_tables(&self) -> Result<SchemaMap, BackendError>;

    /// Syntactic/logical check without side effects: native dry-run where
    /// the warehouse prices it, EXPLAIN elsewhere. Mutation keywords fail
    /// before any warehouse round-trip.
    async fn validate(&self, sql: &str) -> Result<SqlValidationResult, BackendError>;

    /// Run a single read-only statement, returning up to `row_limit` rows
    /// within `timeout`. A trailing LIMIT is injected when absent.
    async fn execute(
        &self,
        sql: &str,
        row_limit: usize,
        timeout: Duration,
    ) -> Result<Vec<Row>, BackendError>;

    /// Transpile SQL written in another dialect into this backend's
    /// dialect
    fn translate_from(&self, source: SqlDialect, sql: &str) -> Result<String, DialectError> {
        translator::translate(sql, source, self.dialect())
    }
}

/// Mutation/shape guard run by every driver before touching the warehouse
pub(crate) fn guard_read_only(sql: &str, backend: &dyn OmopBackend) -> Result<(), BackendError> {
    guard::assert_read_only(sql, backend.dialect()).map_err(read_only_to_backend)
}

/// Prepare SQL for execution: guard it, then make sure a trailing LIMIT is
/// present
pub(crate) fn prepare_execute(
    sql: &str,
    backend: &dyn OmopBackend,
    row_limit: usize,
) -> Result<String, BackendError> {
    guard_read_only(sql, backend)?;
    guard::inject_row_limit(sql, backend.dialect(), row_limit).map_err(read_only_to_backend)
}

fn read_only_to_backend(err: ReadOnlyError) -> BackendError {
    match err {
        ReadOnlyError::Violation(violation) => match &violation {
            SafetyViolation::ForbiddenKeyword { .. }
            | SafetyViolation::MultipleStatements { .. }
            | SafetyViolation::NotReadOnly => BackendError::Security(violation.to_string()),
            other => BackendError::Query(other.to_string()),
        },
        ReadOnlyError::Dialect(e) => BackendError::Query(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use omop_mcp_sql::dialect::SqlDialect;

    #[test]
    fn prepare_execute_blocks_mutations() {
        let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery).build();
        let err = prepare_execute("DROP TABLE person", &backend, 100).unwrap_err();
        assert!(matches!(err, BackendError::Security(_)));
    }

    #[test]
    fn prepare_execute_appends_limit() {
        let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery).build();
        let sql = prepare_execute("SELECT person_id FROM person", &backend, 42).unwrap();
        assert!(sql.ends_with("LIMIT 42"));
    }

    #[test]
    fn translate_from_targets_own_dialect() {
        let backend = MockBackend::builder("postgres", SqlDialect::Postgres).build();
        let sql = backend
            .translate_from(
                SqlDialect::BigQuery,
                "SELECT person_id FROM person WHERE person_id IN (1, 2)",
            )
            .unwrap();
        assert!(sql.contains("IN (1, 2)"));

        let err = backend.translate_from(SqlDialect::BigQuery, "SELECT FROM WHERE");
        assert!(err.is_err());
    }
}
