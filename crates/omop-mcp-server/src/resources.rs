//! Cacheable read-only resources
//!
//! Three URI families: `concept://{id}`, `search://?query=...` with opaque
//! `offset:N` cursors, and `capabilities://`. Malformed URIs and cursors
//! fail with `InvalidRequest`; unknown concepts with `NotFound`.

use crate::server::McpServer;
use omop_mcp_core::error::ServerError;
use omop_mcp_core::model::Domain;
use omop_mcp_vocab::types::{SearchParams, MAX_SEARCH_LIMIT};
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Resource listing in MCP shape
pub fn list() -> Value {
    json!({
        "resources": [
            {
                "uri": "capabilities://",
                "name": "Backend capabilities",
                "description": "Registered backends, their dialects, feature flags, and the default backend",
                "mimeType": "application/json"
            }
        ],
        "resourceTemplates": [
            {
                "uriTemplate": "concept://{id}",
                "name": "OMOP concept",
                "description": "A single vocabulary concept by id",
                "mimeType": "application/json"
            },
            {
                "uriTemplate": "search://?query={q}&domain={d}&vocabulary={v}&standard_only={s}&cursor={c}&page_size={n}",
                "name": "Concept search",
                "description": "Cursor-paginated lexical concept search",
                "mimeType": "application/json"
            }
        ]
    })
}

/// Read one resource URI into its JSON body
pub async fn read(server: &McpServer, uri: &str) -> Result<Value, ServerError> {
    if uri == "capabilities://" || uri == "capabilities:" {
        return capabilities(server).await;
    }
    if let Some(rest) = uri.strip_prefix("concept://") {
        return concept(server, rest).await;
    }
    if let Some(rest) = uri.strip_prefix("search://") {
        return search(server, rest).await;
    }
    Err(ServerError::invalid_request(format!(
        "unknown resource URI: {uri}"
    )))
}

async fn capabilities(server: &McpServer) -> Result<Value, ServerError> {
    let backends = server.registry().list().await;
    Ok(json!({
        "backends": backends,
        "default_backend": server.registry().default_backend(),
    }))
}

async fn concept(server: &McpServer, raw_id: &str) -> Result<Value, ServerError> {
    let id: i64 = raw_id.parse().map_err(|_| {
        ServerError::invalid_request(format!("concept id must be an integer, got '{raw_id}'"))
    })?;
    if id < 1 {
        return Err(ServerError::invalid_request(
            "concept id must be a positive integer",
        ));
    }

    let concept = server
        .vocabulary()
        .get_concept(id)
        .await
        .map_err(crate::tools::vocab_error)?;
    serde_json::to_value(concept)
        .map_err(|e| ServerError::invalid_request(format!("serialization failed: {e}")))
}

async fn search(server: &McpServer, rest: &str) -> Result<Value, ServerError> {
    let query_string = rest.strip_prefix('?').unwrap_or(rest);
    let params = parse_query_string(query_string)?;

    let query = params
        .get("query")
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| ServerError::invalid_request("search:// requires a query parameter"))?
        .clone();

    let domain = match params.get("domain") {
        None => None,
        Some(raw) => Some(Domain::parse_strict(raw).ok_or_else(|| {
            ServerError::invalid_request(format!("unknown domain: {raw}"))
        })?),
    };

    let standard_only = match params.get("standard_only").map(String::as_str) {
        None => true,
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(other) => {
            return Err(ServerError::invalid_request(format!(
                "standard_only must be a boolean, got '{other}'"
            )))
        }
    };

    let page_size = match params.get("page_size") {
        None => DEFAULT_PAGE_SIZE,
        Some(raw) => {
            let n: usize = raw.parse().map_err(|_| {
                ServerError::invalid_request(format!("page_size must be an integer, got '{raw}'"))
            })?;
            if n < 1 || n > MAX_SEARCH_LIMIT {
                return Err(ServerError::invalid_request(format!(
                    "page_size {n} is out of range [1, {MAX_SEARCH_LIMIT}]"
                )));
            }
            n
        }
    };

    let offset = match params.get("cursor") {
        None => 0,
        Some(cursor) => parse_cursor(cursor)?,
    };

    let search_params = SearchParams {
        query: query.clone(),
        domain,
        vocabulary: params.get("vocabulary").cloned(),
        standard_only,
        limit: page_size,
        offset,
    };

    let page = server
        .vocabulary()
        .search(&search_params)
        .await
        .map_err(crate::tools::vocab_error)?;

    Ok(json!({
        "query": query,
        "concepts": page.concepts,
        "next_cursor": page.next_offset.map(|o| format!("offset:{o}")),
    }))
}

/// Cursors are opaque `offset:{non-negative-int}` strings
fn parse_cursor(cursor: &str) -> Result<usize, ServerError> {
    cursor
        .strip_prefix("offset:")
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| {
            ServerError::invalid_request(format!("malformed cursor '{cursor}'"))
        })
}

fn parse_query_string(query_string: &str) -> Result<HashMap<String, String>, ServerError> {
    let mut params = HashMap::new();
    for pair in query_string.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key)
            .map_err(|e| ServerError::invalid_request(format!("malformed URI: {e}")))?;
        let value = urlencoding::decode(value)
            .map_err(|e| ServerError::invalid_request(format!("malformed URI: {e}")))?;
        params.insert(key.into_owned(), value.into_owned());
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cursor_parsing() {
        assert_eq!(parse_cursor("offset:0").unwrap(), 0);
        assert_eq!(parse_cursor("offset:42").unwrap(), 42);
        assert!(parse_cursor("page:2").is_err());
        assert!(parse_cursor("offset:-1").is_err());
        assert!(parse_cursor("offset:abc").is_err());
    }

    #[test]
    fn query_string_parsing_decodes() {
        let params = parse_query_string("query=type%202%20diabetes&page_size=5").unwrap();
        assert_eq!(params.get("query").unwrap(), "type 2 diabetes");
        assert_eq!(params.get("page_size").unwrap(), "5");
    }
}
