//! OMOP vocabulary API client
//!
//! Wraps the external vocabulary HTTP service behind the
//! [`VocabularySource`] trait: paginated lexical search, single-concept
//! lookup, and outgoing relationships. Upstream camelCase payloads are
//! normalized into the core `Concept`/`Relationship` shapes; transient
//! failures retry with jittered exponential backoff; successful responses
//! land in a bounded LRU cache.

pub mod cache;
pub mod client;
pub mod mock;
pub mod types;

pub use cache::VocabularyCache;
pub use client::{VocabularyClient, VocabularyError};
pub use mock::MockVocabulary;
pub use types::{SearchPage, SearchParams};

use async_trait::async_trait;
use omop_mcp_core::model::{Concept, Relationship};

/// The three vocabulary operations the server consumes. Implemented by the
/// HTTP client and by the in-memory test double.
#[async_trait]
pub trait VocabularySource: Send + Sync {
    /// Paginated lexical search
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, VocabularyError>;

    /// Single record by id
    async fn get_concept(&self, id: i64) -> Result<Concept, VocabularyError>;

    /// Outgoing edges, optionally filtered by relationship kind
    async fn get_relationships(
        &self,
        id: i64,
        relationship: Option<&str>,
    ) -> Result<Vec<Relationship>, VocabularyError>;
}
