//! SQL dialect registry and per-dialect fragment helpers

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, PostgreSqlDialect, SnowflakeDialect,
};

/// Dialects the translator and generator understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    BigQuery,
    Snowflake,
    Postgres,
    DuckDb,
    Generic,
}

impl SqlDialect {
    /// Parse a dialect name. Accepts the common aliases seen in client
    /// requests.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bigquery" | "bq" => Some(Self::BigQuery),
            "snowflake" => Some(Self::Snowflake),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "duckdb" => Some(Self::DuckDb),
            "generic" | "ansi" => Some(Self::Generic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Postgres => "postgres",
            Self::DuckDb => "duckdb",
            Self::Generic => "generic",
        }
    }

    /// The sqlparser dialect used for parsing in this dialect
    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            Self::BigQuery => Box::new(BigQueryDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::DuckDb => Box::new(DuckDbDialect {}),
            Self::Generic => Box::new(GenericDialect {}),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Date arithmetic granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DateUnit {
    Day,
    Month,
    Year,
}

impl DateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Month => "MONTH",
            Self::Year => "YEAR",
        }
    }

    pub fn lowercase(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Dialect-specific fragment construction implemented by every backend
/// driver. The generator goes through this trait only, so generated SQL is
/// portable across warehouses.
pub trait DialectOps {
    /// Dialect name, e.g. "bigquery"
    fn dialect(&self) -> SqlDialect;

    /// Fully-qualified identifier for a logical OMOP table
    fn qualified_table(&self, table: &str) -> String;

    /// Fragment computing age in years as of the current date
    fn age_expression(&self, birth_column: &str) -> String;

    /// Fragment computing `end - start` in the given unit
    fn date_diff_expression(&self, unit: DateUnit, start: &str, end: &str) -> String;

    /// Whether the dialect supports QUALIFY over window functions
    fn supports_qualify(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_names_roundtrip() {
        for dialect in [
            SqlDialect::BigQuery,
            SqlDialect::Snowflake,
            SqlDialect::Postgres,
            SqlDialect::DuckDb,
        ] {
            assert_eq!(SqlDialect::from_name(dialect.as_str()), Some(dialect));
        }
        assert_eq!(SqlDialect::from_name("postgresql"), Some(SqlDialect::Postgres));
        assert_eq!(SqlDialect::from_name("oracle"), None);
    }
}
