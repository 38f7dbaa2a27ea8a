//! The safety pipeline wrapping every SQL-emitting tool
//!
//! Ordered checks, all or fail:
//! 1. statement kind (single SELECT / WITH ... SELECT, no mutation keyword)
//! 2. table allowlist (when strict_table_validation)
//! 3. column blocklist (when phi_mode is off)
//! 4. row-limit injection / cap
//! 5. driver dry-run
//! 6. cost cap
//! 7. timed execution with cancellation
//!
//! Nothing here degrades silently; every failure carries its taxonomy code.

use omop_mcp_backend::driver::{BackendError, OmopBackend};
use omop_mcp_core::config::ServerConfig;
use omop_mcp_core::error::{ErrorCode, ServerError};
use omop_mcp_core::model::Row;
use omop_mcp_core::SqlValidationResult;
use omop_mcp_sql::guard::{self, ReadOnlyError, SafetyViolation};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// SQL that has passed the static checks, with the limit that will be
/// enforced at execution
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub sql: String,
    pub effective_limit: usize,
}

pub struct SafetyPipeline<'a> {
    config: &'a ServerConfig,
}

impl<'a> SafetyPipeline<'a> {
    pub fn new(config: &'a ServerConfig) -> Self {
        Self { config }
    }

    /// Steps 1-4: everything that can run without touching the warehouse
    pub fn pre_checks(
        &self,
        sql: &str,
        backend: &dyn OmopBackend,
        requested_limit: Option<usize>,
    ) -> Result<PreparedQuery, ServerError> {
        let dialect = backend.dialect();

        // 1. statement kind
        guard::assert_read_only(sql, dialect).map_err(read_only_error)?;

        // 2. table allowlist
        if self.config.strict_table_validation {
            let tables = guard::referenced_tables(sql, dialect)
                .map_err(|e| ServerError::new(ErrorCode::DialectError, e.to_string()))?;
            for table in tables {
                let allowed = self
                    .config
                    .omop_allowed_tables
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&table));
                if !allowed {
                    return Err(ServerError::security_violation(format!(
                        "table '{table}' is not on the OMOP table allowlist"
                    )));
                }
            }
        }

        // 3. column blocklist
        if !self.config.phi_mode {
            if let Some(column) = guard::find_blocked_column(sql, &self.config.omop_blocked_columns)
            {
                return Err(ServerError::security_violation(format!(
                    "column '{column}' may carry PHI and is blocked while phi_mode is disabled"
                )));
            }
        }

        // 4. row limit
        let requested = requested_limit.unwrap_or(self.config.default_row_limit);
        if requested < 1 || requested > self.config.max_row_limit {
            return Err(ServerError::invalid_request(format!(
                "limit {requested} is out of range [1, {}]",
                self.config.max_row_limit
            )));
        }
        let (sql, effective_limit) =
            guard::enforce_row_limit(sql, dialect, requested, self.config.max_row_limit)
                .map_err(read_only_error)?;

        Ok(PreparedQuery {
            sql,
            effective_limit,
        })
    }

    /// Step 5: driver dry-run. An invalid result becomes `ValidationFailed`
    /// carrying the upstream reason.
    pub async fn dry_run(
        &self,
        backend: &dyn OmopBackend,
        prepared: &PreparedQuery,
    ) -> Result<SqlValidationResult, ServerError> {
        let validation = backend
            .validate(&prepared.sql)
            .await
            .map_err(|e| backend_error(e).with_sql(&prepared.sql))?;

        if !validation.valid {
            let reason = validation
                .error
                .clone()
                .unwrap_or_else(|| "validation failed".to_string());
            return Err(
                ServerError::new(ErrorCode::ValidationFailed, reason).with_sql(&prepared.sql)
            );
        }
        Ok(validation)
    }

    /// Step 6: cost cap against the configured maximum
    pub fn enforce_cost(
        &self,
        validation: &SqlValidationResult,
        sql: &str,
    ) -> Result<(), ServerError> {
        if validation.estimated_cost_usd > self.config.max_query_cost_usd {
            return Err(ServerError::new(
                ErrorCode::CostLimitExceeded,
                format!(
                    "estimated cost ${:.2} exceeds the ${:.2} limit",
                    validation.estimated_cost_usd, self.config.max_query_cost_usd
                ),
            )
            .with_details(serde_json::json!({
                "estimated_cost_usd": validation.estimated_cost_usd,
                "limit_usd": self.config.max_query_cost_usd,
            }))
            .with_sql(sql));
        }
        Ok(())
    }

    /// Step 7: execution under the configured deadline, cancellable from
    /// the transport
    pub async fn execute(
        &self,
        backend: &dyn OmopBackend,
        prepared: &PreparedQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, ServerError> {
        let timeout = Duration::from_secs(self.config.query_timeout_sec);

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(ServerError::timeout("request cancelled").with_sql(&prepared.sql))
            }
            result = backend.execute(&prepared.sql, prepared.effective_limit, timeout) => {
                result.map_err(|e| backend_error(e).with_sql(&prepared.sql))
            }
        }
    }
}

fn read_only_error(err: ReadOnlyError) -> ServerError {
    match err {
        ReadOnlyError::Violation(violation) => match &violation {
            SafetyViolation::LimitTooHigh { .. } => {
                ServerError::invalid_request(violation.to_string())
            }
            _ => ServerError::security_violation(violation.to_string()),
        },
        ReadOnlyError::Dialect(e) => ServerError::new(ErrorCode::DialectError, e.to_string()),
    }
}

/// Uniform mapping from driver errors into the caller-visible taxonomy
pub fn backend_error(err: BackendError) -> ServerError {
    match err {
        BackendError::Security(message) => ServerError::security_violation(message),
        BackendError::Timeout(secs) => {
            ServerError::timeout(format!("execution exceeded {secs}s"))
        }
        BackendError::Query(message) => ServerError::new(ErrorCode::ValidationFailed, message),
        BackendError::Authentication(message)
        | BackendError::Unavailable(message)
        | BackendError::InvalidResponse(message)
        | BackendError::Config(message) => {
            ServerError::new(ErrorCode::BackendUnavailable, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omop_mcp_backend::mock::MockBackend;
    use omop_mcp_sql::dialect::SqlDialect;
    use pretty_assertions::assert_eq;

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    fn backend() -> MockBackend {
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build()
    }

    #[test]
    fn mutation_fails_step_one() {
        let config = config();
        let pipeline = SafetyPipeline::new(&config);
        let err = pipeline
            .pre_checks("DELETE FROM person", &backend(), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityViolation);
    }

    #[test]
    fn strict_mode_rejects_off_list_tables() {
        let mut config = config();
        config.strict_table_validation = true;
        let pipeline = SafetyPipeline::new(&config);

        let err = pipeline
            .pre_checks("SELECT * FROM secret_notes", &backend(), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityViolation);
        assert!(err.message.contains("secret_notes"));

        // The same table is fine when strict validation is off
        let relaxed_config = ServerConfig::default();
        let relaxed = SafetyPipeline::new(&relaxed_config);
        assert!(relaxed
            .pre_checks("SELECT * FROM secret_notes", &backend(), None)
            .is_ok());
    }

    #[test]
    fn phi_gate_follows_phi_mode() {
        let sql = "SELECT person_source_value FROM person";

        let config = config();
        let pipeline = SafetyPipeline::new(&config);
        let err = pipeline.pre_checks(sql, &backend(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityViolation);

        let mut phi_config = ServerConfig::default();
        phi_config.phi_mode = true;
        let phi_pipeline = SafetyPipeline::new(&phi_config);
        assert!(phi_pipeline.pre_checks(sql, &backend(), None).is_ok());
    }

    #[test]
    fn limit_is_injected_and_capped() {
        let config = config();
        let pipeline = SafetyPipeline::new(&config);

        let prepared = pipeline
            .pre_checks("SELECT person_id FROM person", &backend(), Some(50))
            .unwrap();
        assert!(prepared.sql.ends_with("LIMIT 50"));
        assert_eq!(prepared.effective_limit, 50);

        let err = pipeline
            .pre_checks("SELECT person_id FROM person LIMIT 99999", &backend(), None)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn requested_limit_out_of_range() {
        let config = config();
        let pipeline = SafetyPipeline::new(&config);
        let err = pipeline
            .pre_checks("SELECT 1", &backend(), Some(0))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn cost_cap_blocks_execution() {
        let mut config = config();
        config.max_query_cost_usd = 1.0;
        let pipeline = SafetyPipeline::new(&config);

        let validation = SqlValidationResult::valid(5_000_000_000_000, 5.0);
        let err = pipeline.enforce_cost(&validation, "SELECT 1").unwrap_err();
        assert_eq!(err.code, ErrorCode::CostLimitExceeded);
        let details = err.details.unwrap();
        assert_eq!(details["estimated_cost_usd"], 5.0);
        assert_eq!(details["limit_usd"], 1.0);
    }

    #[tokio::test]
    async fn dry_run_failure_carries_reason_and_sql() {
        let config = config();
        let pipeline = SafetyPipeline::new(&config);
        let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery)
            .with_validation(SqlValidationResult::invalid("Unrecognized name: persn"))
            .build();

        let prepared = PreparedQuery {
            sql: "SELECT 1 FROM persn LIMIT 10".to_string(),
            effective_limit: 10,
        };
        let err = pipeline.dry_run(&backend, &prepared).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert!(err.message.contains("Unrecognized name"));
        assert_eq!(err.details.unwrap()["sql"], prepared.sql);
    }

    #[tokio::test]
    async fn cancellation_stops_execution() {
        let config = config();
        let pipeline = SafetyPipeline::new(&config);
        let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery)
            .with_latency(Duration::from_secs(5))
            .build();

        let prepared = PreparedQuery {
            sql: "SELECT 1 LIMIT 1".to_string(),
            effective_limit: 1,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .execute(&backend, &prepared, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }
}
