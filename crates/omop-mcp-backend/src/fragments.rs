//! Per-dialect SQL fragments shared by the drivers
//!
//! Each driver's `DialectOps` delegates here so a dialect's date arithmetic
//! is written exactly once.

use omop_mcp_sql::dialect::{DateUnit, SqlDialect};

/// Age in whole years as of the current date
pub fn age_expression(dialect: SqlDialect, birth_column: &str) -> String {
    match dialect {
        SqlDialect::BigQuery => {
            format!("DATE_DIFF(CURRENT_DATE(), DATE({birth_column}), YEAR)")
        }
        SqlDialect::Snowflake => {
            format!("DATEDIFF(YEAR, {birth_column}, CURRENT_DATE())")
        }
        SqlDialect::DuckDb => {
            format!("date_diff('year', CAST({birth_column} AS DATE), current_date)")
        }
        SqlDialect::Postgres => {
            format!("EXTRACT(YEAR FROM age(CURRENT_DATE, {birth_column}::date))::int")
        }
        SqlDialect::Generic => {
            format!("EXTRACT(YEAR FROM CURRENT_DATE) - EXTRACT(YEAR FROM {birth_column})")
        }
    }
}

/// `end - start` in the requested unit
pub fn date_diff_expression(
    dialect: SqlDialect,
    unit: DateUnit,
    start: &str,
    end: &str,
) -> String {
    match dialect {
        SqlDialect::BigQuery => format!("DATE_DIFF({end}, {start}, {})", unit.as_str()),
        SqlDialect::Snowflake => format!("DATEDIFF({}, {start}, {end})", unit.as_str()),
        SqlDialect::DuckDb => format!("date_diff('{}', {start}, {end})", unit.lowercase()),
        SqlDialect::Postgres => match unit {
            DateUnit::Day => format!("({end}::date - {start}::date)"),
            DateUnit::Month => format!(
                "(EXTRACT(YEAR FROM age({end}::date, {start}::date)) * 12 + \
                 EXTRACT(MONTH FROM age({end}::date, {start}::date)))::int"
            ),
            DateUnit::Year => {
                format!("EXTRACT(YEAR FROM age({end}::date, {start}::date))::int")
            }
        },
        SqlDialect::Generic => format!("DATE_DIFF({end}, {start}, {})", unit.as_str()),
    }
}

pub fn supports_qualify(dialect: SqlDialect) -> bool {
    matches!(dialect, SqlDialect::BigQuery | SqlDialect::Snowflake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bigquery_date_diff_argument_order() {
        assert_eq!(
            date_diff_expression(SqlDialect::BigQuery, DateUnit::Day, "a", "b"),
            "DATE_DIFF(b, a, DAY)"
        );
    }

    #[test]
    fn snowflake_date_diff_argument_order() {
        assert_eq!(
            date_diff_expression(SqlDialect::Snowflake, DateUnit::Day, "a", "b"),
            "DATEDIFF(DAY, a, b)"
        );
    }

    #[test]
    fn duckdb_uses_lowercase_functional_form() {
        assert_eq!(
            date_diff_expression(SqlDialect::DuckDb, DateUnit::Day, "a", "b"),
            "date_diff('day', a, b)"
        );
    }

    #[test]
    fn postgres_day_diff_is_date_subtraction() {
        assert_eq!(
            date_diff_expression(SqlDialect::Postgres, DateUnit::Day, "a", "b"),
            "(b::date - a::date)"
        );
    }

    #[test]
    fn qualify_support() {
        assert!(supports_qualify(SqlDialect::BigQuery));
        assert!(supports_qualify(SqlDialect::Snowflake));
        assert!(!supports_qualify(SqlDialect::DuckDb));
        assert!(!supports_qualify(SqlDialect::Postgres));
    }
}
