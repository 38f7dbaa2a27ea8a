//! HTTP client for the external OMOP vocabulary API
//!
//! Transient failures (network errors, 5xx, 429) retry up to three attempts
//! total with jittered exponential backoff; 400 and 404 map to typed errors
//! immediately. The configured timeout bounds each operation end to end,
//! retries included.

use crate::cache::VocabularyCache;
use crate::types::{
    SearchPage, SearchParams, WireConcept, WireRelationshipResponse, WireSearchResponse,
};
use crate::VocabularySource;
use async_trait::async_trait;
use omop_mcp_core::config::ServerConfig;
use omop_mcp_core::model::{Concept, Relationship};
use rand::Rng;
use std::time::Duration;

/// Total attempts per call, first try included
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for the backoff schedule
const BACKOFF_BASE_MS: u64 = 250;

/// Vocabulary failure kinds, translated by the tool layer into the
/// user-visible taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VocabularyError {
    #[error("Vocabulary request timed out after {0}s")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Vocabulary service unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid vocabulary request: {0}")]
    InvalidRequest(String),
}

/// Outcome classification for one HTTP attempt
enum Attempt<T> {
    Done(T),
    Fatal(VocabularyError),
    Retry(VocabularyError),
}

pub struct VocabularyClient {
    http: reqwest::Client,
    base_url: String,
    timeout_sec: u64,
    cache: VocabularyCache,
}

impl VocabularyClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout_sec: u64,
        cache_size: usize,
    ) -> Result<Self, VocabularyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .map_err(|e| VocabularyError::Unavailable(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_sec,
            cache: VocabularyCache::new(cache_size),
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, VocabularyError> {
        Self::new(
            &config.vocabulary_base_url,
            config.vocabulary_timeout_sec,
            config.vocabulary_cache_size,
        )
    }

    /// GET a path with query parameters, retrying transient failures.
    /// The whole loop runs under the configured deadline.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, VocabularyError> {
        let url = format!("{}{}", self.base_url, path);
        let deadline = Duration::from_secs(self.timeout_sec);

        let result = tokio::time::timeout(deadline, self.get_json_with_retries(&url, query)).await;
        match result {
            Ok(inner) => inner,
            Err(_) => Err(VocabularyError::Timeout(self.timeout_sec)),
        }
    }

    async fn get_json_with_retries<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, VocabularyError> {
        let mut last_error = VocabularyError::Unavailable("no attempts made".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt_get(url, query).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(err) => {
                    tracing::debug!(url, attempt, error = %err, "vocabulary attempt failed");
                    last_error = err;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn attempt_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Attempt<T> {
        let response = match self.http.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Attempt::Fatal(VocabularyError::Timeout(self.timeout_sec))
            }
            Err(e) => return Attempt::Retry(VocabularyError::Unavailable(e.to_string())),
        };

        let status = response.status();
        match classify_status(status.as_u16()) {
            StatusClass::Ok => match response.json::<T>().await {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Fatal(VocabularyError::Unavailable(format!(
                    "malformed vocabulary response: {e}"
                ))),
            },
            StatusClass::NotFound => Attempt::Fatal(VocabularyError::NotFound(url.to_string())),
            StatusClass::BadRequest => {
                let body = response.text().await.unwrap_or_default();
                Attempt::Fatal(VocabularyError::InvalidRequest(body))
            }
            StatusClass::Transient => Attempt::Retry(VocabularyError::Unavailable(format!(
                "vocabulary API returned {status}"
            ))),
            StatusClass::Other => Attempt::Fatal(VocabularyError::Unavailable(format!(
                "vocabulary API returned {status}"
            ))),
        }
    }
}

/// HTTP status classification for retry purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Ok,
    NotFound,
    BadRequest,
    Transient,
    Other,
}

pub(crate) fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Ok,
        404 => StatusClass::NotFound,
        400 => StatusClass::BadRequest,
        429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Other,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_BASE_MS / 2);
    Duration::from_millis(base + jitter)
}

#[async_trait]
impl VocabularySource for VocabularyClient {
    async fn search(&self, params: &SearchParams) -> Result<SearchPage, VocabularyError> {
        let key = params.cache_key();
        if let Some(page) = self.cache.get::<SearchPage>(&key) {
            return Ok(page);
        }

        let limit = params.effective_limit();
        let mut query: Vec<(&str, String)> = vec![
            ("query", params.query.clone()),
            ("limit", limit.to_string()),
            ("offset", params.offset.to_string()),
        ];
        if let Some(domain) = params.domain {
            query.push(("domain", domain.as_str().to_string()));
        }
        if let Some(vocabulary) = &params.vocabulary {
            query.push(("vocabulary", vocabulary.clone()));
        }
        if params.standard_only {
            query.push(("standard_concept", "true".to_string()));
        }

        let response: WireSearchResponse = self.get_json("/concepts/search", &query).await?;
        let concepts: Vec<Concept> = response
            .concepts
            .into_iter()
            .filter_map(WireConcept::normalize)
            .collect();

        let next_offset = if concepts.len() < limit {
            None
        } else {
            Some(params.offset + limit)
        };

        let page = SearchPage {
            concepts,
            next_offset,
        };
        self.cache.put(key, &page);
        Ok(page)
    }

    async fn get_concept(&self, id: i64) -> Result<Concept, VocabularyError> {
        if id < 1 {
            return Err(VocabularyError::InvalidRequest(format!(
                "concept id must be positive, got {id}"
            )));
        }

        let key = format!("concept/{id}");
        if let Some(concept) = self.cache.get::<Concept>(&key) {
            return Ok(concept);
        }

        let wire: WireConcept = self.get_json(&format!("/concepts/{id}"), &[]).await?;
        let concept = wire
            .normalize()
            .ok_or_else(|| VocabularyError::NotFound(format!("concept {id}")))?;

        self.cache.put(key, &concept);
        Ok(concept)
    }

    async fn get_relationships(
        &self,
        id: i64,
        relationship: Option<&str>,
    ) -> Result<Vec<Relationship>, VocabularyError> {
        if id < 1 {
            return Err(VocabularyError::InvalidRequest(format!(
                "concept id must be positive, got {id}"
            )));
        }

        let key = format!(
            "relationships/{id}?kind={}",
            relationship.unwrap_or("")
        );
        if let Some(relationships) = self.cache.get::<Vec<Relationship>>(&key) {
            return Ok(relationships);
        }

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(kind) = relationship {
            query.push(("relationship_id", kind.to_string()));
        }

        let response: WireRelationshipResponse = self
            .get_json(&format!("/concepts/{id}/relationships"), &query)
            .await?;
        let relationships: Vec<Relationship> = response
            .relationships
            .into_iter()
            .filter_map(|r| r.normalize())
            .collect();

        self.cache.put(key, &relationships);
        Ok(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), StatusClass::Ok);
        assert_eq!(classify_status(404), StatusClass::NotFound);
        assert_eq!(classify_status(400), StatusClass::BadRequest);
        assert_eq!(classify_status(429), StatusClass::Transient);
        assert_eq!(classify_status(500), StatusClass::Transient);
        assert_eq!(classify_status(503), StatusClass::Transient);
        assert_eq!(classify_status(301), StatusClass::Other);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        let second = backoff_delay(2);
        assert!(first >= Duration::from_millis(BACKOFF_BASE_MS));
        assert!(second >= Duration::from_millis(BACKOFF_BASE_MS * 2));
        // Jitter stays within half the base
        assert!(first <= Duration::from_millis(BACKOFF_BASE_MS + BACKOFF_BASE_MS / 2));
    }

    #[tokio::test]
    async fn rejects_non_positive_ids_without_io() {
        let client = VocabularyClient::new("http://localhost:0", 1, 10).unwrap();
        let err = client.get_concept(0).await.unwrap_err();
        assert!(matches!(err, VocabularyError::InvalidRequest(_)));

        let err = client.get_relationships(-5, None).await.unwrap_err();
        assert!(matches!(err, VocabularyError::InvalidRequest(_)));
    }
}
