//! Value types owned by a single request
//!
//! Everything here is an immutable record produced by one component and
//! consumed by the tool/resource layer. No interior mutability, no sharing
//! beyond the enclosing response.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A result row: ordered string-keyed map of JSON values.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// OMOP domain partition of the standardized vocabularies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Domain {
    Condition,
    Drug,
    Procedure,
    Measurement,
    Observation,
    Device,
    Visit,
    Death,
    Demographics,
    Other,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Condition => "Condition",
            Self::Drug => "Drug",
            Self::Procedure => "Procedure",
            Self::Measurement => "Measurement",
            Self::Observation => "Observation",
            Self::Device => "Device",
            Self::Visit => "Visit",
            Self::Death => "Death",
            Self::Demographics => "Demographics",
            Self::Other => "Other",
        }
    }

    /// Parse a domain tag case-insensitively. Unknown tags map to `Other`
    /// so upstream vocabulary surprises never poison a response.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "condition" => Self::Condition,
            "drug" => Self::Drug,
            "procedure" => Self::Procedure,
            "measurement" | "meas value" => Self::Measurement,
            "observation" => Self::Observation,
            "device" => Self::Device,
            "visit" => Self::Visit,
            "death" => Self::Death,
            "demographics" | "gender" | "race" | "ethnicity" => Self::Demographics,
            _ => Self::Other,
        }
    }

    /// Strict parse for tool arguments; unknown tags are an error there.
    pub fn parse_strict(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "condition" => Some(Self::Condition),
            "drug" => Some(Self::Drug),
            "procedure" => Some(Self::Procedure),
            "measurement" => Some(Self::Measurement),
            "observation" => Some(Self::Observation),
            "device" => Some(Self::Device),
            "visit" => Some(Self::Visit),
            "death" => Some(Self::Death),
            "demographics" => Some(Self::Demographics),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tri-valued standardness of a concept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardConcept {
    Standard,
    Classification,
    NonStandard,
}

impl StandardConcept {
    /// Map the OMOP `standard_concept` flag. `S` is standard, `C` is a
    /// classification concept, anything else (including absent) is
    /// non-standard.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some("S") | Some("s") => Self::Standard,
            Some("C") | Some("c") => Self::Classification,
            _ => Self::NonStandard,
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, Self::Standard)
    }
}

/// One OMOP vocabulary entry, normalized from the upstream API.
///
/// Invariants: `concept_id >= 1`; `domain` belongs to the enumerated set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub concept_id: i64,
    pub concept_name: String,
    pub domain: Domain,
    pub vocabulary_id: String,
    pub concept_class_id: String,
    pub standard_concept: StandardConcept,
    pub concept_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// Search relevance score, present only on search results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Directed edge between two concepts
///
/// Invariant: both endpoint ids >= 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub concept_id_1: i64,
    pub concept_id_2: i64,
    /// Relationship kind, e.g. "Maps to", "Is a"
    pub relationship_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_end_date: Option<NaiveDate>,
}

/// Envelope returned by concept discovery.
///
/// The derived lists are always consistent with `concepts`: construct via
/// [`ConceptDiscoveryResult::new`] and nothing can drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDiscoveryResult {
    pub query: String,
    pub concepts: Vec<Concept>,
    pub standard_concepts: Vec<Concept>,
    pub concept_ids: Vec<i64>,
    pub metadata: BTreeMap<String, String>,
}

impl ConceptDiscoveryResult {
    pub fn new(
        query: impl Into<String>,
        concepts: Vec<Concept>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let standard_concepts = concepts
            .iter()
            .filter(|c| c.standard_concept.is_standard())
            .cloned()
            .collect();
        let concept_ids = concepts.iter().map(|c| c.concept_id).collect();
        Self {
            query: query.into(),
            concepts,
            standard_concepts,
            concept_ids,
            metadata,
        }
    }
}

/// Outcome of a dry-run or EXPLAIN validation.
///
/// Invariant: if `valid` is false, `error` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Estimated bytes processed; 0 for backends without dry-run pricing
    pub bytes_processed: u64,
    /// Estimated cost in USD; 0.0 for backends without dry-run pricing
    pub estimated_cost_usd: f64,
}

impl SqlValidationResult {
    pub fn valid(bytes_processed: u64, estimated_cost_usd: f64) -> Self {
        Self {
            valid: true,
            error: None,
            bytes_processed,
            estimated_cost_usd,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty(), "invalid result requires a message");
        Self {
            valid: false,
            error: Some(error),
            bytes_processed: 0,
            estimated_cost_usd: 0.0,
        }
    }
}

/// Generated cohort SQL plus context about how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSqlResult {
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<SqlValidationResult>,
    pub exposure_concept_count: usize,
    pub outcome_concept_count: usize,
    pub backend: String,
    pub dialect: String,
    pub generated_at: DateTime<Utc>,
    /// Schema adaptation warnings recorded during generation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Result of an analytical or raw-SQL query.
///
/// `results` is present only when execution was requested and permitted;
/// any row set is capped to the effective row limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Row>>,
    pub row_count: usize,
    pub bytes_processed: u64,
    pub estimated_cost_usd: f64,
    pub backend: String,
    pub dialect: String,
    pub execution_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Feature flags a backend may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFeature {
    DryRun,
    CostEstimate,
    Execute,
    Explain,
    Translate,
    Local,
}

/// Lifecycle status of a backend driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Live,
    Beta,
    Deprecated,
}

/// One entry in the `capabilities://` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendCapability {
    pub name: String,
    pub dialect: String,
    pub features: Vec<BackendFeature>,
    pub status: BackendStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn concept(id: i64, standard: StandardConcept) -> Concept {
        Concept {
            concept_id: id,
            concept_name: format!("concept {id}"),
            domain: Domain::Condition,
            vocabulary_id: "SNOMED".to_string(),
            concept_class_id: "Clinical Finding".to_string(),
            standard_concept: standard,
            concept_code: format!("{id}"),
            valid_start_date: None,
            valid_end_date: None,
            invalid_reason: None,
            score: None,
        }
    }

    #[test]
    fn domain_lenient_parse() {
        assert_eq!(Domain::parse_lenient("condition"), Domain::Condition);
        assert_eq!(Domain::parse_lenient("Drug"), Domain::Drug);
        assert_eq!(Domain::parse_lenient("Spec Anatomic Site"), Domain::Other);
        assert_eq!(Domain::parse_lenient("gender"), Domain::Demographics);
    }

    #[test]
    fn domain_strict_parse_rejects_unknown() {
        assert_eq!(Domain::parse_strict("Condition"), Some(Domain::Condition));
        assert_eq!(Domain::parse_strict("Spec Anatomic Site"), None);
    }

    #[test]
    fn standard_flag_tri_valued() {
        assert_eq!(StandardConcept::from_flag(Some("S")), StandardConcept::Standard);
        assert_eq!(
            StandardConcept::from_flag(Some("C")),
            StandardConcept::Classification
        );
        assert_eq!(StandardConcept::from_flag(None), StandardConcept::NonStandard);
        assert_eq!(
            StandardConcept::from_flag(Some("")),
            StandardConcept::NonStandard
        );
    }

    #[test]
    fn discovery_result_derives_consistent_lists() {
        let concepts = vec![
            concept(1, StandardConcept::Standard),
            concept(2, StandardConcept::NonStandard),
            concept(3, StandardConcept::Standard),
        ];
        let result = ConceptDiscoveryResult::new("flu", concepts, BTreeMap::new());

        assert_eq!(result.concept_ids, vec![1, 2, 3]);
        assert_eq!(result.standard_concepts.len(), 2);
        assert!(result
            .standard_concepts
            .iter()
            .all(|c| c.standard_concept.is_standard()));
    }

    #[test]
    fn validation_result_constructors() {
        let ok = SqlValidationResult::valid(1024, 0.01);
        assert!(ok.valid);
        assert!(ok.error.is_none());

        let bad = SqlValidationResult::invalid("unknown column");
        assert!(!bad.valid);
        assert_eq!(bad.error.as_deref(), Some("unknown column"));
        assert_eq!(bad.estimated_cost_usd, 0.0);
    }
}
