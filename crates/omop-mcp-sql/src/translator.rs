//! Dialect translation over the sqlparser AST
//!
//! Translation is best-effort: SQL is parsed in the source dialect and
//! re-emitted as canonical text, then re-parsed in the target dialect to
//! confirm nothing vendor-proprietary slipped through. Anything the parser
//! cannot represent fails loudly - fragments are never dropped.

use crate::dialect::SqlDialect;
use sqlparser::ast::{
    Expr, GroupByExpr, Join, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins,
};
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

/// Translator error types
#[derive(Debug, thiserror::Error)]
pub enum DialectError {
    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),

    #[error("Failed to parse SQL as {dialect}: {message}")]
    Parse { dialect: SqlDialect, message: String },

    #[error("SQL is empty")]
    Empty,

    #[error("Translated SQL is not valid {dialect}: {message}")]
    Untranslatable { dialect: SqlDialect, message: String },
}

/// Parse SQL in a dialect, failing loudly on anything unparseable
pub fn parse(sql: &str, dialect: SqlDialect) -> Result<Vec<Statement>, DialectError> {
    if sql.trim().is_empty() {
        return Err(DialectError::Empty);
    }
    let parser_dialect = dialect.parser_dialect();
    Parser::parse_sql(&*parser_dialect, sql).map_err(|e| DialectError::Parse {
        dialect,
        message: e.to_string(),
    })
}

/// Parse for structural analysis rather than translation. sqlparser gates
/// some clauses (QUALIFY among them) unevenly across its dialects; the
/// generic dialect accepts the superset, so it serves as the fallback when
/// the warehouse dialect refuses a statement its engine would accept.
pub fn parse_lenient(sql: &str, dialect: SqlDialect) -> Result<Vec<Statement>, DialectError> {
    match parse(sql, dialect) {
        Ok(statements) => Ok(statements),
        Err(DialectError::Empty) => Err(DialectError::Empty),
        Err(original) => match parse(sql, SqlDialect::Generic) {
            Ok(statements) => Ok(statements),
            Err(_) => Err(original),
        },
    }
}

/// Check that SQL parses in the given dialect
pub fn validate_syntax(sql: &str, dialect: SqlDialect) -> Result<(), DialectError> {
    parse(sql, dialect).map(|_| ())
}

/// Canonical formatting: parse and re-emit
pub fn format(sql: &str, dialect: SqlDialect) -> Result<String, DialectError> {
    let statements = parse(sql, dialect)?;
    Ok(statements
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(";\n"))
}

/// Transpile SQL from one dialect to another.
///
/// The emitted text must re-parse in the target dialect; if it does not,
/// the translation fails with `Untranslatable` rather than handing back SQL
/// the target warehouse would reject for a different reason.
pub fn translate(sql: &str, source: SqlDialect, target: SqlDialect) -> Result<String, DialectError> {
    let statements = parse(sql, source)?;
    let rendered = statements
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(";\n");

    if source != target {
        let target_dialect = target.parser_dialect();
        Parser::parse_sql(&*target_dialect, &rendered).map_err(|e| {
            DialectError::Untranslatable {
                dialect: target,
                message: e.to_string(),
            }
        })?;
    }
    Ok(rendered)
}

/// Extract the unqualified, lowercased names of every physical table the
/// SQL references. CTE names are excluded; qualified names contribute their
/// final segment.
pub fn extract_tables(sql: &str, dialect: SqlDialect) -> Result<Vec<String>, DialectError> {
    let statements = parse_lenient(sql, dialect)?;
    let mut tables = BTreeSet::new();
    let mut ctes = BTreeSet::new();

    for statement in &statements {
        if let Statement::Query(query) = statement {
            collect_query(query, &mut tables, &mut ctes);
        }
    }

    Ok(tables
        .into_iter()
        .filter(|t| !ctes.contains(t))
        .collect())
}

fn collect_query(query: &Query, tables: &mut BTreeSet<String>, ctes: &mut BTreeSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ctes.insert(cte.alias.name.value.to_lowercase());
            collect_query(&cte.query, tables, ctes);
        }
    }
    collect_set_expr(&query.body, tables, ctes);
}

fn collect_set_expr(body: &SetExpr, tables: &mut BTreeSet<String>, ctes: &mut BTreeSet<String>) {
    match body {
        SetExpr::Select(select) => collect_select(select, tables, ctes),
        SetExpr::Query(query) => collect_query(query, tables, ctes),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, tables, ctes);
            collect_set_expr(right, tables, ctes);
        }
        _ => {}
    }
}

fn collect_select(select: &Select, tables: &mut BTreeSet<String>, ctes: &mut BTreeSet<String>) {
    for twj in &select.from {
        collect_table_with_joins(twj, tables, ctes);
    }
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                collect_expr(expr, tables, ctes)
            }
            _ => {}
        }
    }
    if let Some(selection) = &select.selection {
        collect_expr(selection, tables, ctes);
    }
    if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
        for expr in exprs {
            collect_expr(expr, tables, ctes);
        }
    }
    if let Some(having) = &select.having {
        collect_expr(having, tables, ctes);
    }
    if let Some(qualify) = &select.qualify {
        collect_expr(qualify, tables, ctes);
    }
}

fn collect_table_with_joins(
    twj: &TableWithJoins,
    tables: &mut BTreeSet<String>,
    ctes: &mut BTreeSet<String>,
) {
    collect_table_factor(&twj.relation, tables, ctes);
    for Join { relation, .. } in &twj.joins {
        collect_table_factor(relation, tables, ctes);
    }
}

fn collect_table_factor(
    factor: &TableFactor,
    tables: &mut BTreeSet<String>,
    ctes: &mut BTreeSet<String>,
) {
    match factor {
        TableFactor::Table { name, .. } => {
            if let Some(last) = name.0.last() {
                // A backticked BigQuery name may arrive as one identifier
                // containing dots; the final segment is the table either way.
                let unqualified = last.value.rsplit('.').next().unwrap_or(&last.value);
                tables.insert(unqualified.to_lowercase());
            }
        }
        TableFactor::Derived { subquery, .. } => collect_query(subquery, tables, ctes),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_table_with_joins(table_with_joins, tables, ctes),
        _ => {}
    }
}

fn collect_expr(expr: &Expr, tables: &mut BTreeSet<String>, ctes: &mut BTreeSet<String>) {
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            collect_expr(left, tables, ctes);
            collect_expr(right, tables, ctes);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            collect_expr(expr, tables, ctes)
        }
        Expr::IsNull(expr) | Expr::IsNotNull(expr) => collect_expr(expr, tables, ctes),
        Expr::InList { expr, list, .. } => {
            collect_expr(expr, tables, ctes);
            for item in list {
                collect_expr(item, tables, ctes);
            }
        }
        Expr::InSubquery { expr, subquery, .. } => {
            collect_expr(expr, tables, ctes);
            collect_query(subquery, tables, ctes);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_expr(expr, tables, ctes);
            collect_expr(low, tables, ctes);
            collect_expr(high, tables, ctes);
        }
        Expr::Exists { subquery, .. } => collect_query(subquery, tables, ctes),
        Expr::Subquery(subquery) => collect_query(subquery, tables, ctes),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn validate_accepts_cte_select() {
        let sql = "WITH x AS (SELECT person_id FROM person) SELECT * FROM x";
        assert!(validate_syntax(sql, SqlDialect::BigQuery).is_ok());
    }

    #[test]
    fn validate_rejects_garbage() {
        let err = validate_syntax("SELECT FROM WHERE", SqlDialect::Generic).unwrap_err();
        assert!(matches!(err, DialectError::Parse { .. }));
    }

    #[test]
    fn empty_sql_is_an_error() {
        assert!(matches!(
            validate_syntax("  ", SqlDialect::Generic),
            Err(DialectError::Empty)
        ));
    }

    #[test]
    fn translate_preserves_cte_and_in_list() {
        let sql = "WITH flu AS (SELECT person_id FROM condition_occurrence \
                   WHERE condition_concept_id IN (1, 2)) SELECT COUNT(*) FROM flu";
        let out = translate(sql, SqlDialect::BigQuery, SqlDialect::Postgres).unwrap();
        assert!(out.contains("WITH flu AS"));
        assert!(out.contains("IN (1, 2)"));
        // Round trip back to the source dialect parses too
        let back = translate(&out, SqlDialect::Postgres, SqlDialect::BigQuery).unwrap();
        assert!(validate_syntax(&back, SqlDialect::BigQuery).is_ok());
    }

    #[test]
    fn extract_tables_skips_cte_names() {
        let sql = "WITH exposure AS (SELECT person_id FROM drug_exposure), \
                   outcome AS (SELECT person_id FROM condition_occurrence) \
                   SELECT * FROM exposure e JOIN outcome o ON e.person_id = o.person_id";
        let tables = extract_tables(sql, SqlDialect::Generic).unwrap();
        assert_eq!(tables, vec!["condition_occurrence", "drug_exposure"]);
    }

    #[test]
    fn extract_tables_unqualifies_names() {
        let sql = "SELECT 1 FROM `proj.dataset.person` p";
        let tables = extract_tables(sql, SqlDialect::BigQuery).unwrap();
        assert_eq!(tables, vec!["person"]);
    }

    #[test]
    fn extract_tables_sees_subqueries() {
        let sql = "SELECT person_id FROM condition_occurrence WHERE person_id IN \
                   (SELECT person_id FROM death)";
        let tables = extract_tables(sql, SqlDialect::Generic).unwrap();
        assert_eq!(tables, vec!["condition_occurrence", "death"]);
    }
}
