//! Tool registry and handlers
//!
//! Each tool has a typed argument record deserialized and bounds-checked
//! before any I/O. Handlers map component errors into the user-visible
//! taxonomy; for the SQL tools the generated statement rides along in error
//! details so callers can inspect and retry.

use crate::export::{self, ExportFormat};
use crate::safety::{self, SafetyPipeline};
use crate::server::McpServer;
use chrono::Utc;
use omop_mcp_core::error::{ErrorCode, ServerError};
use omop_mcp_core::model::{
    CohortSqlResult, Concept, ConceptDiscoveryResult, Domain, QueryResult,
};
use omop_mcp_core::omop;
use omop_mcp_sql::generator::{self, AnalyticalQueryType, CohortRequest, SqlBuildError};
use omop_mcp_vocab::client::VocabularyError;
use omop_mcp_vocab::types::{SearchParams, MAX_SEARCH_LIMIT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tool listing in MCP shape, input schema included
pub fn definitions() -> Value {
    json!({
        "tools": [
            {
                "name": "discover_concepts",
                "description": "Search the OMOP standardized vocabularies for concepts matching a query",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "domain": { "type": "string" },
                        "vocabulary": { "type": "string" },
                        "standard_only": { "type": "boolean", "default": true },
                        "limit": { "type": "integer", "default": 20, "maximum": 100 }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "get_concept_relationships",
                "description": "List outgoing relationships of a concept, optionally filtered by kind",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "concept_id": { "type": "integer" },
                        "relationship_id": { "type": "string" }
                    },
                    "required": ["concept_id"]
                }
            },
            {
                "name": "query_omop",
                "description": "Generate (and optionally execute) an analytical query over one OMOP domain",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query_type": { "type": "string", "enum": ["count", "breakdown", "list_patients"] },
                        "concept_ids": { "type": "array", "items": { "type": "integer" } },
                        "domain": { "type": "string" },
                        "backend": { "type": "string" },
                        "execute": { "type": "boolean", "default": true },
                        "limit": { "type": "integer" }
                    },
                    "required": ["query_type", "concept_ids", "domain"]
                }
            },
            {
                "name": "generate_cohort_sql",
                "description": "Build exposure/outcome cohort SQL; validates but never executes",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "exposure_ids": { "type": "array", "items": { "type": "integer" } },
                        "outcome_ids": { "type": "array", "items": { "type": "integer" } },
                        "pre_outcome_days": { "type": "integer", "default": 90 },
                        "exposure_domain": { "type": "string", "default": "Drug" },
                        "outcome_domain": { "type": "string", "default": "Condition" },
                        "backend": { "type": "string" },
                        "validate": { "type": "boolean", "default": true }
                    },
                    "required": ["exposure_ids", "outcome_ids"]
                }
            },
            {
                "name": "get_information_schema",
                "description": "Discover live tables and columns, flagged against the OMOP CDM reference",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "table_name": { "type": "string" },
                        "backend": { "type": "string" }
                    }
                }
            },
            {
                "name": "select_query",
                "description": "Run caller-provided SQL through the full safety pipeline",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "sql": { "type": "string" },
                        "validate": { "type": "boolean", "default": true },
                        "execute": { "type": "boolean", "default": true },
                        "backend": { "type": "string" },
                        "limit": { "type": "integer" }
                    },
                    "required": ["sql"]
                }
            },
            {
                "name": "export_concept_set",
                "description": "Write a concept set to disk as JSON, CSV, or JSONL (optionally gzipped)",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "concepts": { "type": "array" },
                        "path": { "type": "string" },
                        "format": { "type": "string", "enum": ["json", "csv", "jsonl"], "default": "json" },
                        "gzip": { "type": "boolean", "default": false }
                    },
                    "required": ["concepts", "path"]
                }
            },
            {
                "name": "export_query_result",
                "description": "Write a query result to disk as JSON, CSV, or JSONL (optionally gzipped)",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "result": { "type": "object" },
                        "path": { "type": "string" },
                        "format": { "type": "string", "enum": ["json", "csv", "jsonl"], "default": "json" },
                        "gzip": { "type": "boolean", "default": false }
                    },
                    "required": ["result", "path"]
                }
            },
            {
                "name": "export_cohort_definition",
                "description": "Write a cohort definition to disk as JSON (optionally gzipped)",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "cohort": { "type": "object" },
                        "path": { "type": "string" },
                        "gzip": { "type": "boolean", "default": false }
                    },
                    "required": ["cohort", "path"]
                }
            },
            {
                "name": "export_sql_file",
                "description": "Write SQL text to disk (optionally gzipped)",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "sql": { "type": "string" },
                        "path": { "type": "string" },
                        "gzip": { "type": "boolean", "default": false }
                    },
                    "required": ["sql", "path"]
                }
            }
        ]
    })
}

/// Route one tool call to its handler
pub async fn call(
    server: &McpServer,
    name: &str,
    arguments: Value,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    tracing::info!(tool = name, "tool invoked");
    match name {
        "discover_concepts" => discover_concepts(server, parse(arguments)?, cancel).await,
        "get_concept_relationships" => {
            get_concept_relationships(server, parse(arguments)?, cancel).await
        }
        "query_omop" => query_omop(server, parse(arguments)?, cancel).await,
        "generate_cohort_sql" => generate_cohort_sql(server, parse(arguments)?).await,
        "get_information_schema" => get_information_schema(server, parse(arguments)?).await,
        "select_query" => select_query(server, parse(arguments)?, cancel).await,
        "export_concept_set" => export_concept_set(parse(arguments)?),
        "export_query_result" => export_query_result(parse(arguments)?),
        "export_cohort_definition" => export_cohort_definition(parse(arguments)?),
        "export_sql_file" => export_sql_file(parse(arguments)?),
        _ => Err(ServerError::not_found(format!("unknown tool: {name}"))),
    }
}

fn parse<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ServerError> {
    serde_json::from_value(arguments)
        .map_err(|e| ServerError::invalid_request(format!("invalid tool arguments: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ServerError> {
    serde_json::to_value(value)
        .map_err(|e| ServerError::invalid_request(format!("serialization failed: {e}")))
}

fn default_true() -> bool {
    true
}

pub(crate) fn vocab_error(error: VocabularyError) -> ServerError {
    match error {
        VocabularyError::Timeout(secs) => {
            ServerError::timeout(format!("vocabulary call exceeded {secs}s"))
        }
        VocabularyError::NotFound(what) => ServerError::not_found(what),
        VocabularyError::Unavailable(message) => {
            ServerError::new(ErrorCode::VocabularyError, message)
        }
        VocabularyError::InvalidRequest(message) => ServerError::invalid_request(message),
    }
}

fn build_error(error: SqlBuildError) -> ServerError {
    match &error {
        SqlBuildError::PatientListDisabled => ServerError::security_violation(error.to_string()),
        SqlBuildError::MissingTable { .. } | SqlBuildError::MissingColumn { .. } => {
            ServerError::new(ErrorCode::ValidationFailed, error.to_string())
        }
        _ => ServerError::invalid_request(error.to_string()),
    }
}

/// Await vocabulary I/O under the request's cancellation signal
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, VocabularyError>>,
) -> Result<T, ServerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ServerError::timeout("request cancelled")),
        result = fut => result.map_err(vocab_error),
    }
}

// ---------------------------------------------------------------------------
// discover_concepts

#[derive(Debug, Deserialize)]
struct DiscoverConceptsArgs {
    query: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    vocabulary: Option<String>,
    #[serde(default = "default_true")]
    standard_only: bool,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    20
}

async fn discover_concepts(
    server: &McpServer,
    args: DiscoverConceptsArgs,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    if args.query.trim().is_empty() {
        return Err(ServerError::invalid_request("query must not be empty"));
    }
    if args.limit < 1 || args.limit > MAX_SEARCH_LIMIT {
        return Err(ServerError::invalid_request(format!(
            "limit {} is out of range [1, {MAX_SEARCH_LIMIT}]",
            args.limit
        )));
    }
    let domain = parse_domain(args.domain.as_deref())?;

    let params = SearchParams {
        query: args.query.clone(),
        domain,
        vocabulary: args.vocabulary.clone(),
        standard_only: args.standard_only,
        limit: args.limit,
        offset: 0,
    };

    let page = with_cancel(cancel, server.vocabulary().search(&params)).await?;

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "domain".to_string(),
        args.domain.unwrap_or_else(|| "any".to_string()),
    );
    metadata.insert(
        "vocabulary".to_string(),
        args.vocabulary.unwrap_or_else(|| "any".to_string()),
    );
    metadata.insert(
        "standard_only".to_string(),
        args.standard_only.to_string(),
    );
    metadata.insert("limit".to_string(), args.limit.to_string());

    to_value(ConceptDiscoveryResult::new(
        args.query,
        page.concepts,
        metadata,
    ))
}

fn parse_domain(raw: Option<&str>) -> Result<Option<Domain>, ServerError> {
    match raw {
        None => Ok(None),
        Some(raw) => Domain::parse_strict(raw)
            .map(Some)
            .ok_or_else(|| ServerError::invalid_request(format!("unknown domain: {raw}"))),
    }
}

// ---------------------------------------------------------------------------
// get_concept_relationships

#[derive(Debug, Deserialize)]
struct GetConceptRelationshipsArgs {
    concept_id: i64,
    #[serde(default)]
    relationship_id: Option<String>,
}

async fn get_concept_relationships(
    server: &McpServer,
    args: GetConceptRelationshipsArgs,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    if args.concept_id < 1 {
        return Err(ServerError::invalid_request(
            "concept_id must be a positive integer",
        ));
    }

    let relationships = with_cancel(
        cancel,
        server
            .vocabulary()
            .get_relationships(args.concept_id, args.relationship_id.as_deref()),
    )
    .await?;

    let count = relationships.len();
    Ok(json!({
        "concept_id": args.concept_id,
        "relationship_id": args.relationship_id,
        "relationships": relationships,
        "count": count,
    }))
}

// ---------------------------------------------------------------------------
// query_omop

#[derive(Debug, Deserialize)]
struct QueryOmopArgs {
    query_type: String,
    concept_ids: Vec<i64>,
    domain: String,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default = "default_true")]
    execute: bool,
    #[serde(default)]
    limit: Option<usize>,
}

async fn query_omop(
    server: &McpServer,
    args: QueryOmopArgs,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    let config = server.config();
    let query_type = AnalyticalQueryType::from_name(&args.query_type).ok_or_else(|| {
        ServerError::invalid_request(format!("unknown query_type: {}", args.query_type))
    })?;
    let domain = Domain::parse_strict(&args.domain)
        .ok_or_else(|| ServerError::invalid_request(format!("unknown domain: {}", args.domain)))?;

    let backend = server
        .registry()
        .get(args.backend.as_deref())
        .await
        .map_err(safety::backend_error)?;

    // Best-effort schema adaptation; discovery failure falls back to the
    // canonical CDM column names
    let schema = backend
        .list_tables()
        .await
        .ok()
        .filter(|tables| !tables.is_empty());

    let requested = args.limit.unwrap_or(config.default_row_limit);
    let generated = generator::analytical(
        query_type,
        &args.concept_ids,
        domain,
        requested,
        config.max_row_limit,
        config.allow_patient_list,
        backend.as_ref(),
        schema.as_ref(),
    )
    .map_err(build_error)?;

    let pipeline = SafetyPipeline::new(config);
    let prepared = pipeline.pre_checks(&generated.sql, backend.as_ref(), Some(requested))?;

    let started = Instant::now();
    let validation = pipeline.dry_run(backend.as_ref(), &prepared).await?;

    let mut result = QueryResult {
        sql: prepared.sql.clone(),
        results: None,
        row_count: 0,
        bytes_processed: validation.bytes_processed,
        estimated_cost_usd: validation.estimated_cost_usd,
        backend: backend.name().to_string(),
        dialect: backend.dialect().as_str().to_string(),
        execution_ms: 0,
        warnings: generated.warnings,
    };

    if args.execute {
        pipeline.enforce_cost(&validation, &prepared.sql)?;
        let rows = pipeline.execute(backend.as_ref(), &prepared, cancel).await?;
        result.row_count = rows.len();
        result.results = Some(rows);
    }
    result.execution_ms = started.elapsed().as_millis() as u64;

    to_value(result)
}

// ---------------------------------------------------------------------------
// generate_cohort_sql

#[derive(Debug, Deserialize)]
struct GenerateCohortSqlArgs {
    exposure_ids: Vec<i64>,
    outcome_ids: Vec<i64>,
    #[serde(default = "default_pre_outcome_days")]
    pre_outcome_days: i64,
    #[serde(default)]
    exposure_domain: Option<String>,
    #[serde(default)]
    outcome_domain: Option<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default = "default_true")]
    validate: bool,
}

fn default_pre_outcome_days() -> i64 {
    90
}

async fn generate_cohort_sql(
    server: &McpServer,
    args: GenerateCohortSqlArgs,
) -> Result<Value, ServerError> {
    let backend = server
        .registry()
        .get(args.backend.as_deref())
        .await
        .map_err(safety::backend_error)?;

    let mut request = CohortRequest::new(
        args.exposure_ids.clone(),
        args.outcome_ids.clone(),
        args.pre_outcome_days,
    );
    if let Some(domain) = parse_domain(args.exposure_domain.as_deref())? {
        request.exposure_domain = domain;
    }
    if let Some(domain) = parse_domain(args.outcome_domain.as_deref())? {
        request.outcome_domain = domain;
    }

    let schema = backend
        .list_tables()
        .await
        .ok()
        .filter(|tables| !tables.is_empty());

    let generated =
        generator::cohort(&request, backend.as_ref(), schema.as_ref()).map_err(build_error)?;

    // Optional dry-run; the (possibly invalid) outcome is reported, never
    // acted on - this tool does not execute
    let validation = if args.validate {
        Some(
            backend
                .validate(&generated.sql)
                .await
                .map_err(|e| safety::backend_error(e).with_sql(&generated.sql))?,
        )
    } else {
        None
    };

    to_value(CohortSqlResult {
        sql: generated.sql,
        validation,
        exposure_concept_count: args.exposure_ids.len(),
        outcome_concept_count: args.outcome_ids.len(),
        backend: backend.name().to_string(),
        dialect: backend.dialect().as_str().to_string(),
        generated_at: Utc::now(),
        warnings: generated.warnings,
    })
}

// ---------------------------------------------------------------------------
// get_information_schema

#[derive(Debug, Deserialize)]
struct GetInformationSchemaArgs {
    #[serde(default)]
    table_name: Option<String>,
    #[serde(default)]
    backend: Option<String>,
}

async fn get_information_schema(
    server: &McpServer,
    args: GetInformationSchemaArgs,
) -> Result<Value, ServerError> {
    let backend = server
        .registry()
        .get(args.backend.as_deref())
        .await
        .map_err(safety::backend_error)?;

    let mut tables = backend.list_tables().await.map_err(safety::backend_error)?;

    if let Some(wanted) = &args.table_name {
        let wanted = wanted.to_lowercase();
        match tables.remove(&wanted) {
            Some(info) => {
                tables.clear();
                tables.insert(wanted, info);
            }
            None => {
                return Err(ServerError::not_found(format!(
                    "table '{wanted}' not found in the live schema"
                )))
            }
        }
    }

    let rendered: serde_json::Map<String, Value> = tables
        .iter()
        .map(|(table, info)| {
            let columns: Vec<Value> = info
                .columns
                .iter()
                .map(|column| {
                    json!({
                        "name": column,
                        "standard": omop::is_standard_column(table, column),
                    })
                })
                .collect();
            (
                table.clone(),
                json!({
                    "columns": columns,
                    "date_columns": info.date_columns,
                }),
            )
        })
        .collect();

    Ok(json!({
        "backend": backend.name(),
        "tables": rendered,
    }))
}

// ---------------------------------------------------------------------------
// select_query

#[derive(Debug, Deserialize)]
struct SelectQueryArgs {
    sql: String,
    #[serde(default = "default_true")]
    validate: bool,
    #[serde(default = "default_true")]
    execute: bool,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn select_query(
    server: &McpServer,
    args: SelectQueryArgs,
    cancel: &CancellationToken,
) -> Result<Value, ServerError> {
    let config = server.config();
    let backend = server
        .registry()
        .get(args.backend.as_deref())
        .await
        .map_err(safety::backend_error)?;

    let pipeline = SafetyPipeline::new(config);
    let prepared = pipeline.pre_checks(&args.sql, backend.as_ref(), args.limit)?;

    let started = Instant::now();

    // The dry-run is mandatory on any execute path; the validate flag only
    // applies when the caller wants the SQL checked without running it
    let validation = if args.execute || args.validate {
        pipeline.dry_run(backend.as_ref(), &prepared).await?
    } else {
        omop_mcp_core::SqlValidationResult::valid(0, 0.0)
    };

    let mut result = QueryResult {
        sql: prepared.sql.clone(),
        results: None,
        row_count: 0,
        bytes_processed: validation.bytes_processed,
        estimated_cost_usd: validation.estimated_cost_usd,
        backend: backend.name().to_string(),
        dialect: backend.dialect().as_str().to_string(),
        execution_ms: 0,
        warnings: Vec::new(),
    };

    if args.execute {
        pipeline.enforce_cost(&validation, &prepared.sql)?;
        let rows = pipeline.execute(backend.as_ref(), &prepared, cancel).await?;
        result.row_count = rows.len();
        result.results = Some(rows);
    }
    result.execution_ms = started.elapsed().as_millis() as u64;

    to_value(result)
}

// ---------------------------------------------------------------------------
// export helpers

#[derive(Debug, Deserialize)]
struct ExportConceptSetArgs {
    concepts: Vec<Concept>,
    path: PathBuf,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    gzip: bool,
}

fn export_concept_set(args: ExportConceptSetArgs) -> Result<Value, ServerError> {
    let format = parse_format(args.format.as_deref())?;
    let bytes = match format {
        ExportFormat::Json => export::to_json_bytes(&args.concepts)?,
        ExportFormat::Csv => export::concepts_to_csv(&args.concepts)?,
        ExportFormat::Jsonl => {
            let mut out = Vec::new();
            for concept in &args.concepts {
                out.extend(export::to_json_bytes_compact(concept)?);
                out.push(b'\n');
            }
            out
        }
    };
    finish_export(&args.path, &bytes, args.gzip, format, args.concepts.len())
}

#[derive(Debug, Deserialize)]
struct ExportQueryResultArgs {
    result: QueryResult,
    path: PathBuf,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    gzip: bool,
}

fn export_query_result(args: ExportQueryResultArgs) -> Result<Value, ServerError> {
    let format = parse_format(args.format.as_deref())?;
    let rows = args.result.results.clone().unwrap_or_default();
    let bytes = match format {
        ExportFormat::Json => export::to_json_bytes(&args.result)?,
        ExportFormat::Csv => export::rows_to_csv(&rows)?,
        ExportFormat::Jsonl => export::rows_to_jsonl(&rows)?,
    };
    finish_export(&args.path, &bytes, args.gzip, format, rows.len())
}

#[derive(Debug, Deserialize)]
struct ExportCohortDefinitionArgs {
    cohort: CohortSqlResult,
    path: PathBuf,
    #[serde(default)]
    gzip: bool,
}

fn export_cohort_definition(args: ExportCohortDefinitionArgs) -> Result<Value, ServerError> {
    let bytes = export::to_json_bytes(&args.cohort)?;
    finish_export(&args.path, &bytes, args.gzip, ExportFormat::Json, 1)
}

#[derive(Debug, Deserialize)]
struct ExportSqlFileArgs {
    sql: String,
    path: PathBuf,
    #[serde(default)]
    gzip: bool,
}

fn export_sql_file(args: ExportSqlFileArgs) -> Result<Value, ServerError> {
    finish_export(
        &args.path,
        args.sql.as_bytes(),
        args.gzip,
        ExportFormat::Json,
        1,
    )
    .map(|mut value| {
        value["format"] = json!("sql");
        value
    })
}

fn parse_format(raw: Option<&str>) -> Result<ExportFormat, ServerError> {
    match raw {
        None => Ok(ExportFormat::Json),
        Some(raw) => ExportFormat::from_name(raw)
            .ok_or_else(|| ServerError::invalid_request(format!("unknown format: {raw}"))),
    }
}

fn finish_export(
    path: &std::path::Path,
    bytes: &[u8],
    gzip: bool,
    format: ExportFormat,
    records: usize,
) -> Result<Value, ServerError> {
    let written = export::write_bytes(path, bytes, gzip)?;
    Ok(json!({
        "path": path.display().to_string(),
        "format": format.as_str(),
        "gzip": gzip,
        "bytes_written": written,
        "record_count": records,
    }))
}
