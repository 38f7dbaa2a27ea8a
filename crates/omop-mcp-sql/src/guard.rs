//! Read-only guards applied by the safety pipeline
//!
//! The checks here are deliberately conservative: a forbidden keyword
//! anywhere in the statement is a violation, even where a full parse might
//! prove it harmless. Warehouses holding patient-level data do not get the
//! benefit of the doubt.

use crate::dialect::SqlDialect;
use crate::translator::{self, DialectError};
use regex::Regex;
use sqlparser::ast::{Expr, SetExpr, Statement, Value};
use std::sync::OnceLock;

/// Statement keywords that always fail the guard, case-insensitive,
/// whole-word
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "MERGE", "GRANT",
    "REVOKE",
];

/// A violation detected before any warehouse round-trip
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SafetyViolation {
    #[error("Mutation keyword '{keyword}' is not allowed")]
    ForbiddenKeyword { keyword: String },

    #[error("Expected a single statement, found {count}")]
    MultipleStatements { count: usize },

    #[error("Only SELECT or WITH ... SELECT statements are allowed")]
    NotReadOnly,

    #[error("Table '{table}' is not on the OMOP table allowlist")]
    DisallowedTable { table: String },

    #[error("Column '{column}' is blocked while PHI mode is disabled")]
    BlockedColumn { column: String },

    #[error("LIMIT {limit} exceeds the maximum row limit {max}")]
    LimitTooHigh { limit: u64, max: u64 },
}

fn forbidden_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("forbidden keyword pattern compiles")
    })
}

/// Whole-word scan for mutation keywords. Returns the first offender.
pub fn find_forbidden_keyword(sql: &str) -> Option<String> {
    forbidden_regex()
        .find(sql)
        .map(|m| m.as_str().to_uppercase())
}

/// Case-insensitive whole-word scan for blocked column names
pub fn find_blocked_column(sql: &str, blocked: &[String]) -> Option<String> {
    if blocked.is_empty() {
        return None;
    }
    let lowered = sql.to_lowercase();
    for column in blocked {
        let needle = column.to_lowercase();
        let mut start = 0;
        while let Some(pos) = lowered[start..].find(&needle) {
            let at = start + pos;
            let end = at + needle.len();
            let before = lowered[..at].chars().next_back();
            let after = lowered[end..].chars().next();
            let is_word = |c: Option<char>| {
                c.map(|c| c.is_ascii_alphanumeric() || c == '_').unwrap_or(false)
            };
            if !is_word(before) && !is_word(after) {
                return Some(column.clone());
            }
            start = end;
        }
    }
    None
}

/// Enforce that `sql` is exactly one read-only statement: a top-level
/// SELECT or a WITH ... SELECT. Runs the keyword scan first so mutation
/// attempts fail as `ForbiddenKeyword` even when they would also fail the
/// shape check.
pub fn assert_read_only(sql: &str, dialect: SqlDialect) -> Result<(), ReadOnlyError> {
    if let Some(keyword) = find_forbidden_keyword(sql) {
        return Err(SafetyViolation::ForbiddenKeyword { keyword }.into());
    }

    let statements = translator::parse_lenient(sql, dialect)?;
    if statements.len() != 1 {
        return Err(SafetyViolation::MultipleStatements {
            count: statements.len(),
        }
        .into());
    }

    match &statements[0] {
        Statement::Query(query) => {
            if is_select_body(&query.body) {
                Ok(())
            } else {
                Err(SafetyViolation::NotReadOnly.into())
            }
        }
        _ => Err(SafetyViolation::NotReadOnly.into()),
    }
}

fn is_select_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(_) => true,
        SetExpr::Query(query) => is_select_body(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            is_select_body(left) && is_select_body(right)
        }
        _ => false,
    }
}

/// Guard failure: either a safety violation or SQL we could not analyze
#[derive(Debug, thiserror::Error)]
pub enum ReadOnlyError {
    #[error(transparent)]
    Violation(#[from] SafetyViolation),

    #[error(transparent)]
    Dialect(#[from] DialectError),
}

/// Tables referenced by the SQL, for the allowlist check
pub fn referenced_tables(sql: &str, dialect: SqlDialect) -> Result<Vec<String>, DialectError> {
    translator::extract_tables(sql, dialect)
}

/// Inspect the top-level LIMIT and inject one if absent.
///
/// Returns the SQL to execute and the effective row limit. An existing
/// LIMIT above `max` fails; an absent LIMIT becomes
/// `LIMIT min(requested, max)` appended to the statement.
pub fn enforce_row_limit(
    sql: &str,
    dialect: SqlDialect,
    requested: usize,
    max: usize,
) -> Result<(String, usize), ReadOnlyError> {
    let statements = translator::parse_lenient(sql, dialect)?;
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        _ => return Err(SafetyViolation::NotReadOnly.into()),
    };

    match top_level_limit(query) {
        Some(limit) => {
            if limit > max as u64 {
                return Err(SafetyViolation::LimitTooHigh {
                    limit,
                    max: max as u64,
                }
                .into());
            }
            let effective = (limit as usize).min(requested).min(max);
            Ok((sql.trim().trim_end_matches(';').to_string(), effective))
        }
        None => {
            let effective = requested.min(max);
            let trimmed = sql.trim().trim_end_matches(';').trim_end();
            Ok((format!("{trimmed} LIMIT {effective}"), effective))
        }
    }
}

/// Driver-side belt and braces: append a trailing LIMIT when none is
/// present. Unlike [`enforce_row_limit`] an existing LIMIT is left alone;
/// the pipeline has already capped it by the time a driver sees the SQL.
pub fn inject_row_limit(
    sql: &str,
    dialect: SqlDialect,
    row_limit: usize,
) -> Result<String, ReadOnlyError> {
    let statements = translator::parse_lenient(sql, dialect)?;
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        _ => return Err(SafetyViolation::NotReadOnly.into()),
    };
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if query.limit.is_some() {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed} LIMIT {row_limit}"))
    }
}

fn top_level_limit(query: &sqlparser::ast::Query) -> Option<u64> {
    match &query.limit {
        Some(Expr::Value(Value::Number(n, _))) => n.parse().ok(),
        // A non-literal LIMIT expression is treated as absent so a literal
        // cap still gets applied by the driver's row cap.
        _ => None,
    }
}
