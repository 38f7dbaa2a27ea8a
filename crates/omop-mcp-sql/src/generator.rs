//! Cohort and analytical SQL generation
//!
//! SQL is built from concept ids and structured parameters using only the
//! selected driver's dialect helpers, so the same request produces correct
//! SQL on every warehouse. When a live schema is supplied, generation
//! adapts to it: a missing canonical date column may be substituted by its
//! datetime variant from the same table; anything else is excluded with a
//! recorded warning. The generator never emits a column the live schema
//! does not have.

use crate::dialect::{DateUnit, DialectOps};
use omop_mcp_core::model::Domain;
use omop_mcp_core::omop::{self, DomainMapping, SchemaMap};

/// Upper bound on concept id list length
pub const MAX_CONCEPT_IDS: usize = 1000;

/// Generated SQL plus any schema adaptation warnings
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSql {
    pub sql: String,
    pub warnings: Vec<String>,
}

/// Analytical query families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticalQueryType {
    Count,
    Breakdown,
    ListPatients,
}

impl AnalyticalQueryType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "breakdown" => Some(Self::Breakdown),
            "list_patients" => Some(Self::ListPatients),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Breakdown => "breakdown",
            Self::ListPatients => "list_patients",
        }
    }
}

/// Generation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlBuildError {
    #[error("Concept id list is empty")]
    EmptyConceptIds,

    #[error("Concept id list has {count} entries; at most {MAX_CONCEPT_IDS} are allowed")]
    TooManyConceptIds { count: usize },

    #[error("Concept id {id} is not a positive integer")]
    NonPositiveConceptId { id: i64 },

    #[error("Row limit {limit} is out of range [1, {max}]")]
    InvalidRowLimit { limit: usize, max: usize },

    #[error("pre_outcome_days must be non-negative")]
    InvalidDays,

    #[error("Domain {domain} has no OMOP fact table")]
    UnsupportedDomain { domain: Domain },

    #[error("Patient-level listings are disabled (allow_patient_list=false)")]
    PatientListDisabled,

    #[error("Table '{table}' is missing from the live schema")]
    MissingTable { table: String },

    #[error("Column '{column}' is missing from live table '{table}'")]
    MissingColumn { table: String, column: String },
}

/// Validate a concept id list: non-empty, bounded, positive ids only
pub fn validate_concept_ids(ids: &[i64]) -> Result<(), SqlBuildError> {
    if ids.is_empty() {
        return Err(SqlBuildError::EmptyConceptIds);
    }
    if ids.len() > MAX_CONCEPT_IDS {
        return Err(SqlBuildError::TooManyConceptIds { count: ids.len() });
    }
    if let Some(&id) = ids.iter().find(|&&id| id < 1) {
        return Err(SqlBuildError::NonPositiveConceptId { id });
    }
    Ok(())
}

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build an analytical query over one domain's fact table.
pub fn analytical<O: DialectOps + ?Sized>(
    query_type: AnalyticalQueryType,
    concept_ids: &[i64],
    domain: Domain,
    row_limit: usize,
    max_row_limit: usize,
    allow_patient_list: bool,
    ops: &O,
    schema: Option<&SchemaMap>,
) -> Result<GeneratedSql, SqlBuildError> {
    validate_concept_ids(concept_ids)?;
    if row_limit < 1 || row_limit > max_row_limit {
        return Err(SqlBuildError::InvalidRowLimit {
            limit: row_limit,
            max: max_row_limit,
        });
    }
    if query_type == AnalyticalQueryType::ListPatients && !allow_patient_list {
        return Err(SqlBuildError::PatientListDisabled);
    }

    let mapping =
        omop::domain_mapping(domain).ok_or(SqlBuildError::UnsupportedDomain { domain })?;
    let mut warnings = Vec::new();
    check_live_columns(&mapping, schema, &mut warnings)?;

    let table = ops.qualified_table(mapping.table);
    let ids = id_list(concept_ids);

    let sql = match query_type {
        AnalyticalQueryType::Count => format!(
            "SELECT COUNT(DISTINCT person_id) AS patient_count\n\
             FROM {table}\n\
             WHERE {concept_col} IN ({ids})",
            concept_col = mapping.concept_column,
        ),
        AnalyticalQueryType::Breakdown => {
            let person = ops.qualified_table("person");
            let age = ops.age_expression("p.birth_datetime");
            format!(
                "SELECT p.gender_concept_id, {age} AS age, \
                 COUNT(DISTINCT f.person_id) AS patient_count\n\
                 FROM {table} f\n\
                 JOIN {person} p ON f.person_id = p.person_id\n\
                 WHERE f.{concept_col} IN ({ids})\n\
                 GROUP BY p.gender_concept_id, age\n\
                 ORDER BY patient_count DESC\n\
                 LIMIT {row_limit}",
                concept_col = mapping.concept_column,
            )
        }
        AnalyticalQueryType::ListPatients => format!(
            "SELECT DISTINCT person_id\n\
             FROM {table}\n\
             WHERE {concept_col} IN ({ids})\n\
             LIMIT {row_limit}",
            concept_col = mapping.concept_column,
        ),
    };

    Ok(GeneratedSql { sql, warnings })
}

/// Cohort request parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRequest {
    pub exposure_ids: Vec<i64>,
    pub outcome_ids: Vec<i64>,
    /// Maximum days between exposure and outcome
    pub pre_outcome_days: i64,
    pub exposure_domain: Domain,
    pub outcome_domain: Domain,
}

impl CohortRequest {
    /// Typical epidemiological shape: a drug exposure followed by a
    /// condition outcome.
    pub fn new(exposure_ids: Vec<i64>, outcome_ids: Vec<i64>, pre_outcome_days: i64) -> Self {
        Self {
            exposure_ids,
            outcome_ids,
            pre_outcome_days,
            exposure_domain: Domain::Drug,
            outcome_domain: Domain::Condition,
        }
    }
}

/// Build the three-CTE cohort query: exposure, outcome, and their join
/// keeping the first exposure per person within the time window.
pub fn cohort<O: DialectOps + ?Sized>(
    request: &CohortRequest,
    ops: &O,
    schema: Option<&SchemaMap>,
) -> Result<GeneratedSql, SqlBuildError> {
    validate_concept_ids(&request.exposure_ids)?;
    validate_concept_ids(&request.outcome_ids)?;
    if request.pre_outcome_days < 0 {
        return Err(SqlBuildError::InvalidDays);
    }

    let exposure = omop::domain_mapping(request.exposure_domain).ok_or(
        SqlBuildError::UnsupportedDomain {
            domain: request.exposure_domain,
        },
    )?;
    let outcome = omop::domain_mapping(request.outcome_domain).ok_or(
        SqlBuildError::UnsupportedDomain {
            domain: request.outcome_domain,
        },
    )?;

    let mut warnings = Vec::new();
    let exposure_date = resolve_date_column(&exposure, schema, &mut warnings)?;
    let outcome_date = resolve_date_column(&outcome, schema, &mut warnings)?;

    let exposure_table = ops.qualified_table(exposure.table);
    let outcome_table = ops.qualified_table(outcome.table);
    let exposure_ids = id_list(&request.exposure_ids);
    let outcome_ids = id_list(&request.outcome_ids);
    let window = ops.date_diff_expression(DateUnit::Day, "exposure_date", "outcome_date");
    let days = request.pre_outcome_days;

    let mut lines = vec![
        "WITH exposure AS (".to_string(),
        format!("    SELECT DISTINCT person_id, {exposure_date} AS exposure_date"),
        format!("    FROM {exposure_table}"),
        format!(
            "    WHERE {} IN ({exposure_ids})",
            exposure.concept_column
        ),
        "),".to_string(),
        "outcome AS (".to_string(),
        format!("    SELECT DISTINCT person_id, {outcome_date} AS outcome_date"),
        format!("    FROM {outcome_table}"),
        format!("    WHERE {} IN ({outcome_ids})", outcome.concept_column),
        "),".to_string(),
        "cohort AS (".to_string(),
    ];

    if ops.supports_qualify() {
        lines.extend([
            "    SELECT e.person_id AS person_id, e.exposure_date AS exposure_date, o.outcome_date AS outcome_date".to_string(),
            "    FROM exposure e".to_string(),
            "    JOIN outcome o ON e.person_id = o.person_id".to_string(),
            "    WHERE exposure_date <= outcome_date".to_string(),
            format!("      AND {window} <= {days}"),
            "    QUALIFY ROW_NUMBER() OVER (PARTITION BY person_id ORDER BY exposure_date) = 1".to_string(),
        ]);
    } else {
        lines.extend([
            "    SELECT person_id, exposure_date, outcome_date".to_string(),
            "    FROM (".to_string(),
            "        SELECT e.person_id AS person_id, e.exposure_date AS exposure_date, o.outcome_date AS outcome_date,".to_string(),
            "               ROW_NUMBER() OVER (PARTITION BY e.person_id ORDER BY e.exposure_date) AS rn".to_string(),
            "        FROM exposure e".to_string(),
            "        JOIN outcome o ON e.person_id = o.person_id".to_string(),
            "        WHERE e.exposure_date <= o.outcome_date".to_string(),
            format!("          AND {window} <= {days}"),
            "    ) ranked".to_string(),
            "    WHERE rn = 1".to_string(),
        ]);
    }

    lines.extend([
        ")".to_string(),
        "SELECT person_id, exposure_date, outcome_date".to_string(),
        "FROM cohort".to_string(),
        "ORDER BY person_id".to_string(),
    ]);

    Ok(GeneratedSql {
        sql: lines.join("\n"),
        warnings,
    })
}

/// Pick the date column to use for a fact table against the live schema.
///
/// Substitution happens only for date-role columns within the same table
/// (canonical column -> its datetime variant). Anything else is a hard
/// mismatch surfaced to the caller.
fn resolve_date_column(
    mapping: &DomainMapping,
    schema: Option<&SchemaMap>,
    warnings: &mut Vec<String>,
) -> Result<String, SqlBuildError> {
    let Some(schema) = schema else {
        return Ok(mapping.date_column.to_string());
    };
    let Some(table) = schema.get(mapping.table) else {
        return Err(SqlBuildError::MissingTable {
            table: mapping.table.to_string(),
        });
    };
    if table.has_column(mapping.date_column) {
        return Ok(mapping.date_column.to_string());
    }
    if table.has_column(mapping.datetime_column) {
        warnings.push(format!(
            "table '{}' has no '{}'; substituting datetime variant '{}'",
            mapping.table, mapping.date_column, mapping.datetime_column
        ));
        return Ok(mapping.datetime_column.to_string());
    }
    Err(SqlBuildError::MissingColumn {
        table: mapping.table.to_string(),
        column: mapping.date_column.to_string(),
    })
}

/// With a live schema, confirm the fact table and its concept column exist
fn check_live_columns(
    mapping: &DomainMapping,
    schema: Option<&SchemaMap>,
    _warnings: &mut [String],
) -> Result<(), SqlBuildError> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let Some(table) = schema.get(mapping.table) else {
        return Err(SqlBuildError::MissingTable {
            table: mapping.table.to_string(),
        });
    };
    if !table.has_column(mapping.concept_column) {
        return Err(SqlBuildError::MissingColumn {
            table: mapping.table.to_string(),
            column: mapping.concept_column.to_string(),
        });
    }
    Ok(())
}
