//! OMOP CDM reference data
//!
//! Stable registries describing the CDM v5.4 surface the server is willing
//! to touch: the domain-to-fact-table mapping, the table allowlist, the PHI
//! column blocklist, and the standard column sets used to flag non-standard
//! schemas in `get_information_schema` responses.

use crate::model::Domain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a domain maps onto its CDM fact table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainMapping {
    pub table: &'static str,
    pub concept_column: &'static str,
    /// Canonical event date column
    pub date_column: &'static str,
    /// Datetime variant of the event date column
    pub datetime_column: &'static str,
}

/// Fact table mapping for the queryable domains. Domains without a fact
/// table (Visit, Death, Demographics, ...) return None and are rejected at
/// the tool layer.
pub fn domain_mapping(domain: Domain) -> Option<DomainMapping> {
    match domain {
        Domain::Condition => Some(DomainMapping {
            table: "condition_occurrence",
            concept_column: "condition_concept_id",
            date_column: "condition_start_date",
            datetime_column: "condition_start_datetime",
        }),
        Domain::Drug => Some(DomainMapping {
            table: "drug_exposure",
            concept_column: "drug_concept_id",
            date_column: "drug_exposure_start_date",
            datetime_column: "drug_exposure_start_datetime",
        }),
        Domain::Procedure => Some(DomainMapping {
            table: "procedure_occurrence",
            concept_column: "procedure_concept_id",
            date_column: "procedure_date",
            datetime_column: "procedure_datetime",
        }),
        Domain::Measurement => Some(DomainMapping {
            table: "measurement",
            concept_column: "measurement_concept_id",
            date_column: "measurement_date",
            datetime_column: "measurement_datetime",
        }),
        Domain::Observation => Some(DomainMapping {
            table: "observation",
            concept_column: "observation_concept_id",
            date_column: "observation_date",
            datetime_column: "observation_datetime",
        }),
        _ => None,
    }
}

/// OMOP CDM standard table set (the default `omop_allowed_tables`)
pub const ALLOWED_TABLES: &[&str] = &[
    "person",
    "observation_period",
    "visit_occurrence",
    "visit_detail",
    "condition_occurrence",
    "drug_exposure",
    "procedure_occurrence",
    "device_exposure",
    "measurement",
    "observation",
    "death",
    "note",
    "note_nlp",
    "specimen",
    "fact_relationship",
    "location",
    "care_site",
    "provider",
    "payer_plan_period",
    "cost",
    "drug_era",
    "dose_era",
    "condition_era",
    "episode",
    "episode_event",
    "concept",
    "vocabulary",
    "domain",
    "concept_class",
    "concept_relationship",
    "relationship",
    "concept_synonym",
    "concept_ancestor",
    "source_to_concept_map",
    "drug_strength",
    "cdm_source",
    "metadata",
];

/// PHI source-value columns blocked unless `phi_mode` is enabled
/// (the default `omop_blocked_columns`)
pub const BLOCKED_COLUMNS: &[&str] = &[
    "person_source_value",
    "gender_source_value",
    "race_source_value",
    "ethnicity_source_value",
    "condition_source_value",
    "condition_status_source_value",
    "drug_source_value",
    "route_source_value",
    "procedure_source_value",
    "measurement_source_value",
    "unit_source_value",
    "value_source_value",
    "observation_source_value",
    "device_source_value",
    "visit_source_value",
    "admitted_from_source_value",
    "discharged_to_source_value",
    "cause_source_value",
    "provider_source_value",
    "care_site_source_value",
    "location_source_value",
    "specimen_source_value",
];

/// Columns discovered in a live table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<String>,
    /// Columns whose type is date or timestamp
    pub date_columns: Vec<String>,
}

impl TableInfo {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Live schema of a dataset: logical table name to its columns
pub type SchemaMap = BTreeMap<String, TableInfo>;

/// CDM v5.4 reference columns for the tables the generator touches.
/// Used to flag non-standard columns in `get_information_schema`.
pub fn standard_columns(table: &str) -> Option<&'static [&'static str]> {
    match table {
        "person" => Some(&[
            "person_id",
            "gender_concept_id",
            "year_of_birth",
            "month_of_birth",
            "day_of_birth",
            "birth_datetime",
            "race_concept_id",
            "ethnicity_concept_id",
            "location_id",
            "provider_id",
            "care_site_id",
            "person_source_value",
            "gender_source_value",
            "gender_source_concept_id",
            "race_source_value",
            "race_source_concept_id",
            "ethnicity_source_value",
            "ethnicity_source_concept_id",
        ]),
        "condition_occurrence" => Some(&[
            "condition_occurrence_id",
            "person_id",
            "condition_concept_id",
            "condition_start_date",
            "condition_start_datetime",
            "condition_end_date",
            "condition_end_datetime",
            "condition_type_concept_id",
            "condition_status_concept_id",
            "stop_reason",
            "provider_id",
            "visit_occurrence_id",
            "visit_detail_id",
            "condition_source_value",
            "condition_source_concept_id",
            "condition_status_source_value",
        ]),
        "drug_exposure" => Some(&[
            "drug_exposure_id",
            "person_id",
            "drug_concept_id",
            "drug_exposure_start_date",
            "drug_exposure_start_datetime",
            "drug_exposure_end_date",
            "drug_exposure_end_datetime",
            "verbatim_end_date",
            "drug_type_concept_id",
            "stop_reason",
            "refills",
            "quantity",
            "days_supply",
            "sig",
            "route_concept_id",
            "lot_number",
            "provider_id",
            "visit_occurrence_id",
            "visit_detail_id",
            "drug_source_value",
            "drug_source_concept_id",
            "route_source_value",
            "dose_unit_source_value",
        ]),
        "procedure_occurrence" => Some(&[
            "procedure_occurrence_id",
            "person_id",
            "procedure_concept_id",
            "procedure_date",
            "procedure_datetime",
            "procedure_end_date",
            "procedure_end_datetime",
            "procedure_type_concept_id",
            "modifier_concept_id",
            "quantity",
            "provider_id",
            "visit_occurrence_id",
            "visit_detail_id",
            "procedure_source_value",
            "procedure_source_concept_id",
            "modifier_source_value",
        ]),
        "measurement" => Some(&[
            "measurement_id",
            "person_id",
            "measurement_concept_id",
            "measurement_date",
            "measurement_datetime",
            "measurement_time",
            "measurement_type_concept_id",
            "operator_concept_id",
            "value_as_number",
            "value_as_concept_id",
            "unit_concept_id",
            "range_low",
            "range_high",
            "provider_id",
            "visit_occurrence_id",
            "visit_detail_id",
            "measurement_source_value",
            "measurement_source_concept_id",
            "unit_source_value",
            "value_source_value",
        ]),
        "observation" => Some(&[
            "observation_id",
            "person_id",
            "observation_concept_id",
            "observation_date",
            "observation_datetime",
            "observation_type_concept_id",
            "value_as_number",
            "value_as_string",
            "value_as_concept_id",
            "qualifier_concept_id",
            "unit_concept_id",
            "provider_id",
            "visit_occurrence_id",
            "visit_detail_id",
            "observation_source_value",
            "observation_source_concept_id",
            "unit_source_value",
            "qualifier_source_value",
        ]),
        "visit_occurrence" => Some(&[
            "visit_occurrence_id",
            "person_id",
            "visit_concept_id",
            "visit_start_date",
            "visit_start_datetime",
            "visit_end_date",
            "visit_end_datetime",
            "visit_type_concept_id",
            "provider_id",
            "care_site_id",
            "visit_source_value",
            "visit_source_concept_id",
            "admitted_from_concept_id",
            "admitted_from_source_value",
            "discharged_to_concept_id",
            "discharged_to_source_value",
            "preceding_visit_occurrence_id",
        ]),
        "death" => Some(&[
            "person_id",
            "death_date",
            "death_datetime",
            "death_type_concept_id",
            "cause_concept_id",
            "cause_source_value",
            "cause_source_concept_id",
        ]),
        _ => None,
    }
}

/// Whether a column is part of the CDM reference definition of its table.
/// Tables outside the reference set report false for every column.
pub fn is_standard_column(table: &str, column: &str) -> bool {
    standard_columns(table)
        .map(|cols| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_table_mapping_matches_cdm() {
        let m = domain_mapping(Domain::Condition).unwrap();
        assert_eq!(m.table, "condition_occurrence");
        assert_eq!(m.concept_column, "condition_concept_id");

        let m = domain_mapping(Domain::Drug).unwrap();
        assert_eq!(m.table, "drug_exposure");
        assert_eq!(m.date_column, "drug_exposure_start_date");

        assert!(domain_mapping(Domain::Death).is_none());
        assert!(domain_mapping(Domain::Demographics).is_none());
    }

    #[test]
    fn allowlist_contains_core_tables() {
        for table in ["person", "condition_occurrence", "measurement", "concept"] {
            assert!(ALLOWED_TABLES.contains(&table), "{table} missing");
        }
    }

    #[test]
    fn blocklist_is_source_values_only() {
        assert!(BLOCKED_COLUMNS.iter().all(|c| c.ends_with("_source_value")));
    }

    #[test]
    fn standard_column_flags() {
        assert!(is_standard_column("person", "gender_concept_id"));
        assert!(is_standard_column("person", "GENDER_CONCEPT_ID"));
        assert!(!is_standard_column("person", "custom_flag"));
        assert!(!is_standard_column("not_a_cdm_table", "person_id"));
    }
}
