//! SQL construction, translation, and safety analysis
//!
//! Everything that reads or writes SQL text lives here: the dialect
//! translator over the sqlparser AST, the read-only guards applied by the
//! safety pipeline, and the generator that builds analytical and cohort SQL
//! from concept ids using a backend's dialect helpers.

pub mod dialect;
pub mod generator;
pub mod guard;
pub mod translator;

pub use dialect::{DateUnit, DialectOps, SqlDialect};
pub use generator::{
    analytical, cohort, validate_concept_ids, AnalyticalQueryType, CohortRequest, GeneratedSql,
    SqlBuildError, MAX_CONCEPT_IDS,
};
pub use guard::{
    assert_read_only, enforce_row_limit, find_blocked_column, find_forbidden_keyword,
    inject_row_limit, referenced_tables, ReadOnlyError, SafetyViolation, FORBIDDEN_KEYWORDS,
};
pub use translator::{
    extract_tables, format, parse, parse_lenient, translate, validate_syntax, DialectError,
};
