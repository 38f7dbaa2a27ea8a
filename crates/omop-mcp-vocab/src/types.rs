//! Wire payloads and their normalization into core types
//!
//! The upstream API speaks camelCase with a few historical aliases. Rather
//! than leak that shape downstream, everything is mapped into the canonical
//! `Concept`/`Relationship` records here. Unknown fields are dropped by
//! serde; records with impossible ids are dropped during normalization.

use chrono::NaiveDate;
use omop_mcp_core::model::{Concept, Domain, Relationship, StandardConcept};
use serde::{Deserialize, Deserializer};

/// Hard cap on search page size
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Parameters for a vocabulary search, normalized for cache keying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    pub domain: Option<Domain>,
    pub vocabulary: Option<String>,
    pub standard_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            domain: None,
            vocabulary: None,
            standard_only: true,
            limit: 20,
            offset: 0,
        }
    }

    /// Clamp the page size to the documented maximum
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_SEARCH_LIMIT)
    }

    /// Stable cache key covering every filter
    pub fn cache_key(&self) -> String {
        format!(
            "search?q={}&domain={}&vocab={}&std={}&limit={}&offset={}",
            self.query.trim().to_lowercase(),
            self.domain.map(|d| d.as_str()).unwrap_or(""),
            self.vocabulary.as_deref().unwrap_or(""),
            self.standard_only,
            self.effective_limit(),
            self.offset,
        )
    }
}

/// One page of search results with the cursor to the next page, absent when
/// the search is exhausted
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct SearchPage {
    pub concepts: Vec<Concept>,
    pub next_offset: Option<usize>,
}

/// Accept a date as `YYYY-MM-DD`, null, or absent; anything unparseable is
/// treated as absent rather than poisoning the whole payload.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.get(..10).and_then(|d| d.parse().ok())))
}

/// Concept as the upstream API sends it
#[derive(Debug, Clone, Deserialize)]
pub struct WireConcept {
    #[serde(alias = "conceptId", alias = "id")]
    pub concept_id: i64,

    #[serde(default, alias = "conceptName", alias = "name")]
    pub concept_name: String,

    #[serde(default, alias = "domainId", alias = "domain")]
    pub domain_id: String,

    #[serde(default, alias = "vocabularyId", alias = "vocabulary")]
    pub vocabulary_id: String,

    #[serde(default, alias = "conceptClassId", alias = "conceptClass")]
    pub concept_class_id: String,

    #[serde(default, alias = "standardConcept")]
    pub standard_concept: Option<String>,

    #[serde(default, alias = "conceptCode", alias = "code")]
    pub concept_code: String,

    #[serde(default, alias = "validStartDate", deserialize_with = "lenient_date")]
    pub valid_start_date: Option<NaiveDate>,

    #[serde(default, alias = "validEndDate", deserialize_with = "lenient_date")]
    pub valid_end_date: Option<NaiveDate>,

    #[serde(default, alias = "invalidReason")]
    pub invalid_reason: Option<String>,

    #[serde(default, alias = "relevanceScore")]
    pub score: Option<f64>,
}

impl WireConcept {
    /// Normalize into the core shape. Records violating the `id >= 1`
    /// invariant are dropped.
    pub fn normalize(self) -> Option<Concept> {
        if self.concept_id < 1 {
            return None;
        }
        Some(Concept {
            concept_id: self.concept_id,
            concept_name: self.concept_name,
            domain: Domain::parse_lenient(&self.domain_id),
            vocabulary_id: self.vocabulary_id,
            concept_class_id: self.concept_class_id,
            standard_concept: StandardConcept::from_flag(self.standard_concept.as_deref()),
            concept_code: self.concept_code,
            valid_start_date: self.valid_start_date,
            valid_end_date: self.valid_end_date,
            invalid_reason: self.invalid_reason,
            score: self.score,
        })
    }
}

/// Search response envelope; the items key has drifted across API versions
#[derive(Debug, Clone, Deserialize)]
pub struct WireSearchResponse {
    #[serde(default, alias = "items", alias = "results")]
    pub concepts: Vec<WireConcept>,
}

/// Relationship as the upstream API sends it
#[derive(Debug, Clone, Deserialize)]
pub struct WireRelationship {
    #[serde(alias = "conceptId1", alias = "sourceConceptId")]
    pub concept_id_1: i64,

    #[serde(alias = "conceptId2", alias = "targetConceptId")]
    pub concept_id_2: i64,

    #[serde(default, alias = "relationshipId", alias = "relationship")]
    pub relationship_id: String,

    #[serde(default, alias = "validStartDate", deserialize_with = "lenient_date")]
    pub valid_start_date: Option<NaiveDate>,

    #[serde(default, alias = "validEndDate", deserialize_with = "lenient_date")]
    pub valid_end_date: Option<NaiveDate>,
}

impl WireRelationship {
    pub fn normalize(self) -> Option<Relationship> {
        if self.concept_id_1 < 1 || self.concept_id_2 < 1 {
            return None;
        }
        Some(Relationship {
            concept_id_1: self.concept_id_1,
            concept_id_2: self.concept_id_2,
            relationship_id: self.relationship_id,
            valid_start_date: self.valid_start_date,
            valid_end_date: self.valid_end_date,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireRelationshipResponse {
    #[serde(default, alias = "items", alias = "relationships")]
    pub relationships: Vec<WireRelationship>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn camel_case_payload_normalizes() {
        let json = r#"{
            "conceptId": 4171852,
            "conceptName": "Influenza",
            "domainId": "Condition",
            "vocabularyId": "SNOMED",
            "conceptClassId": "Clinical Finding",
            "standardConcept": "S",
            "conceptCode": "6142004",
            "validStartDate": "1970-01-01",
            "validEndDate": "2099-12-31",
            "unexpectedField": 42
        }"#;

        let wire: WireConcept = serde_json::from_str(json).unwrap();
        let concept = wire.normalize().unwrap();

        assert_eq!(concept.concept_id, 4171852);
        assert_eq!(concept.domain, Domain::Condition);
        assert_eq!(concept.standard_concept, StandardConcept::Standard);
        assert_eq!(
            concept.valid_start_date,
            Some(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
        );
    }

    #[test]
    fn missing_standard_flag_is_non_standard() {
        let json = r#"{"conceptId": 5, "conceptName": "x", "domainId": "Drug"}"#;
        let concept: WireConcept = serde_json::from_str(json).unwrap();
        let concept = concept.normalize().unwrap();
        assert_eq!(concept.standard_concept, StandardConcept::NonStandard);
    }

    #[test]
    fn unparseable_date_becomes_absent() {
        let json = r#"{"conceptId": 5, "validStartDate": "whenever"}"#;
        let concept: WireConcept = serde_json::from_str(json).unwrap();
        assert_eq!(concept.valid_start_date, None);
    }

    #[test]
    fn non_positive_ids_are_dropped() {
        let json = r#"{"conceptId": 0, "conceptName": "bogus"}"#;
        let wire: WireConcept = serde_json::from_str(json).unwrap();
        assert!(wire.normalize().is_none());

        let json = r#"{"conceptId1": -1, "conceptId2": 2, "relationshipId": "Maps to"}"#;
        let wire: WireRelationship = serde_json::from_str(json).unwrap();
        assert!(wire.normalize().is_none());
    }

    #[test]
    fn unknown_domain_maps_to_other() {
        let json = r#"{"conceptId": 5, "domainId": "Spec Anatomic Site"}"#;
        let concept: Concept = serde_json::from_str::<WireConcept>(json).unwrap().normalize().unwrap();
        assert_eq!(concept.domain, Domain::Other);
    }

    #[test]
    fn cache_key_normalizes_query_case() {
        let a = SearchParams::new("Influenza");
        let b = SearchParams::new("influenza  ");
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn effective_limit_clamps() {
        let mut params = SearchParams::new("x");
        params.limit = 500;
        assert_eq!(params.effective_limit(), 100);
        params.limit = 0;
        assert_eq!(params.effective_limit(), 1);
    }
}
