//! In-memory vocabulary double for testing
//!
//! Returns predefined concepts and relationships without any network I/O.
//! Useful for unit testing discovery tools, pagination, and error paths
//! without real credentials.

use crate::client::VocabularyError;
use crate::types::{SearchPage, SearchParams};
use crate::VocabularySource;
use async_trait::async_trait;
use omop_mcp_core::model::{Concept, Relationship};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Mock vocabulary source backed by an in-memory concept list
///
/// Search matches case-insensitively against concept names and applies the
/// same domain/vocabulary/standard filters and offset pagination the real
/// API provides, so cursor behavior can be tested end to end.
#[derive(Default)]
pub struct MockVocabulary {
    concepts: Arc<RwLock<Vec<Concept>>>,
    relationships: Arc<RwLock<HashMap<i64, Vec<Relationship>>>>,
    fail_with: Arc<RwLock<Option<VocabularyError>>>,
    search_calls: AtomicUsize,
}

impl MockVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the searchable concept list
    pub fn with_concepts(self, concepts: Vec<Concept>) -> Self {
        *self.concepts.write().expect("mock lock") = concepts;
        self
    }

    /// Add outgoing relationships for a concept
    pub fn with_relationships(self, concept_id: i64, relationships: Vec<Relationship>) -> Self {
        self.relationships
            .write()
            .expect("mock lock")
            .insert(concept_id, relationships);
        self
    }

    /// Make every call fail with the given error
    pub fn with_failure(self, error: VocabularyError) -> Self {
        *self.fail_with.write().expect("mock lock") = Some(error);
        self
    }

    /// Number of search calls observed (cache-hit assertions)
    pub fn search_call_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<(), VocabularyError> {
        match self.fail_with.read().expect("mock lock").clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VocabularySource for MockVocabulary {
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, VocabularyError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let needle = params.query.to_lowercase();
        let limit = params.effective_limit();
        let concepts = self.concepts.read().expect("mock lock");

        let matching: Vec<Concept> = concepts
            .iter()
            .filter(|c| c.concept_name.to_lowercase().contains(&needle))
            .filter(|c| params.domain.map(|d| c.domain == d).unwrap_or(true))
            .filter(|c| {
                params
                    .vocabulary
                    .as_ref()
                    .map(|v| c.vocabulary_id.eq_ignore_ascii_case(v))
                    .unwrap_or(true)
            })
            .filter(|c| !params.standard_only || c.standard_concept.is_standard())
            .cloned()
            .collect();

        let page: Vec<Concept> = matching
            .iter()
            .skip(params.offset)
            .take(limit)
            .cloned()
            .collect();

        let next_offset = if params.offset + page.len() < matching.len() {
            Some(params.offset + page.len())
        } else {
            None
        };

        Ok(SearchPage {
            concepts: page,
            next_offset,
        })
    }

    async fn get_concept(&self, id: i64) -> Result<Concept, VocabularyError> {
        self.check_failure()?;
        self.concepts
            .read()
            .expect("mock lock")
            .iter()
            .find(|c| c.concept_id == id)
            .cloned()
            .ok_or_else(|| VocabularyError::NotFound(format!("concept {id}")))
    }

    async fn get_relationships(
        &self,
        id: i64,
        relationship: Option<&str>,
    ) -> Result<Vec<Relationship>, VocabularyError> {
        self.check_failure()?;
        let relationships = self.relationships.read().expect("mock lock");
        let edges = relationships.get(&id).cloned().unwrap_or_default();
        Ok(match relationship {
            Some(kind) => edges
                .into_iter()
                .filter(|r| r.relationship_id.eq_ignore_ascii_case(kind))
                .collect(),
            None => edges,
        })
    }
}

/// Build a minimal concept for tests
pub fn test_concept(
    id: i64,
    name: &str,
    domain: omop_mcp_core::model::Domain,
    standard: bool,
) -> Concept {
    use omop_mcp_core::model::StandardConcept;
    Concept {
        concept_id: id,
        concept_name: name.to_string(),
        domain,
        vocabulary_id: "SNOMED".to_string(),
        concept_class_id: "Clinical Finding".to_string(),
        standard_concept: if standard {
            StandardConcept::Standard
        } else {
            StandardConcept::NonStandard
        },
        concept_code: id.to_string(),
        valid_start_date: None,
        valid_end_date: None,
        invalid_reason: None,
        score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omop_mcp_core::model::Domain;
    use pretty_assertions::assert_eq;

    fn flu_fixture() -> MockVocabulary {
        MockVocabulary::new().with_concepts(vec![
            test_concept(4171852, "Influenza", Domain::Condition, true),
            test_concept(4171853, "Influenza-like illness", Domain::Condition, true),
            test_concept(900001, "Influenza (legacy)", Domain::Condition, false),
            test_concept(1503297, "Metformin", Domain::Drug, true),
        ])
    }

    #[tokio::test]
    async fn search_applies_filters() {
        let vocab = flu_fixture();
        let mut params = SearchParams::new("influenza");
        params.domain = Some(Domain::Condition);
        params.standard_only = true;
        params.limit = 5;

        let page = vocab.search(&params).await.unwrap();
        assert_eq!(page.concepts.len(), 2);
        assert!(page.next_offset.is_none());
    }

    #[tokio::test]
    async fn search_paginates_with_offset() {
        let vocab = flu_fixture();
        let mut params = SearchParams::new("influenza");
        params.standard_only = false;
        params.limit = 2;

        let first = vocab.search(&params).await.unwrap();
        assert_eq!(first.concepts.len(), 2);
        assert_eq!(first.next_offset, Some(2));

        params.offset = 2;
        let second = vocab.search(&params).await.unwrap();
        assert_eq!(second.concepts.len(), 1);
        assert_eq!(second.next_offset, None);
    }

    #[tokio::test]
    async fn relationship_filter_by_kind() {
        let vocab = MockVocabulary::new().with_relationships(
            900001,
            vec![
                Relationship {
                    concept_id_1: 900001,
                    concept_id_2: 4171852,
                    relationship_id: "Maps to".to_string(),
                    valid_start_date: None,
                    valid_end_date: None,
                },
                Relationship {
                    concept_id_1: 900001,
                    concept_id_2: 4000000,
                    relationship_id: "Is a".to_string(),
                    valid_start_date: None,
                    valid_end_date: None,
                },
            ],
        );

        let all = vocab.get_relationships(900001, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let maps = vocab
            .get_relationships(900001, Some("Maps to"))
            .await
            .unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].concept_id_2, 4171852);
    }

    #[tokio::test]
    async fn failure_injection() {
        let vocab =
            flu_fixture().with_failure(VocabularyError::Unavailable("boom".to_string()));
        let err = vocab.get_concept(4171852).await.unwrap_err();
        assert_eq!(err, VocabularyError::Unavailable("boom".to_string()));
    }
}
