//! Error taxonomy surfaced to MCP callers
//!
//! IMPORTANT: Error codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the wire contract.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Error code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Schema or bounds violation in a tool argument, resource URI, cursor,
    /// or prompt argument
    InvalidRequest,

    /// Concept, table, or resource id unknown
    NotFound,

    /// Upstream vocabulary API failure
    VocabularyError,

    /// Driver cannot be constructed or reach its warehouse
    BackendUnavailable,

    /// Mutation statement, disallowed table, blocked column, or PHI gate denial
    SecurityViolation,

    /// Dry-run or EXPLAIN rejected the SQL
    ValidationFailed,

    /// Estimated cost above the configured cap
    CostLimitExceeded,

    /// Execution deadline reached or vocabulary call exhausted retries
    Timeout,

    /// SQL could not be parsed or translated in the requested dialect
    DialectError,

    /// Auth hook rejected the bearer token
    Unauthenticated,

    /// Principal lacks the required scope
    Unauthorized,
}

impl ErrorCode {
    /// Get the error code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::VocabularyError => "VOCABULARY_ERROR",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::CostLimitExceeded => "COST_LIMIT_EXCEEDED",
            Self::Timeout => "TIMEOUT",
            Self::DialectError => "DIALECT_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error surfaced to an MCP caller: a stable machine code, a human
/// message, and optional structured details (e.g. the SQL that would have
/// run, or a cost estimate next to the configured cap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Stable machine code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Structured details (best-effort)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    /// Create a new error with minimal fields
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach the SQL that would have run, preserving any existing details
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        match &mut self.details {
            Some(serde_json::Value::Object(map)) => {
                map.insert("sql".to_string(), serde_json::Value::String(sql));
            }
            _ => {
                self.details = Some(serde_json::json!({ "sql": sql }));
            }
        }
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SecurityViolation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_stability() {
        assert_eq!(ErrorCode::SecurityViolation.as_str(), "SECURITY_VIOLATION");
        assert_eq!(ErrorCode::CostLimitExceeded.as_str(), "COST_LIMIT_EXCEEDED");
        assert_eq!(ErrorCode::Unauthenticated.as_str(), "UNAUTHENTICATED");
    }

    #[test]
    fn error_serialization() {
        let err = ServerError::new(ErrorCode::CostLimitExceeded, "estimated $5.00 exceeds cap")
            .with_details(serde_json::json!({ "estimated_cost_usd": 5.0, "limit_usd": 1.0 }));

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("COST_LIMIT_EXCEEDED"));
        assert!(json.contains("estimated_cost_usd"));
    }

    #[test]
    fn with_sql_merges_into_existing_details() {
        let err = ServerError::new(ErrorCode::ValidationFailed, "dry-run failed")
            .with_details(serde_json::json!({ "reason": "unknown column" }))
            .with_sql("SELECT 1");

        let details = err.details.unwrap();
        assert_eq!(details["reason"], "unknown column");
        assert_eq!(details["sql"], "SELECT 1");
    }
}
