//! End-to-end scenarios over the full dispatch surface
//!
//! Every test drives the server through JSON-RPC exactly as a transport
//! would, with a mock warehouse driver and an in-memory vocabulary double.

use omop_mcp_backend::mock::{row, MockBackend};
use omop_mcp_backend::BackendRegistry;
use omop_mcp_core::config::ServerConfig;
use omop_mcp_core::model::Domain;
use omop_mcp_core::SqlValidationResult;
use omop_mcp_server::protocol::{JsonRpcRequest, JsonRpcResponse};
use omop_mcp_server::McpServer;
use omop_mcp_sql::dialect::SqlDialect;
use omop_mcp_vocab::mock::{test_concept, MockVocabulary};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Harness {
    server: McpServer,
    backend: MockBackend,
}

impl Harness {
    fn new(config: ServerConfig, backend: MockBackend, vocabulary: MockVocabulary) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(BackendRegistry::new(Arc::clone(&config)));
        registry.register("bigquery", Arc::new(backend.clone()));
        let server = McpServer::with_parts(config, registry, Arc::new(vocabulary));
        Self { server, backend }
    }

    fn with_defaults() -> Self {
        Self::new(
            ServerConfig::default(),
            MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
            flu_vocabulary(),
        )
    }

    async fn request(&self, method: &str, params: Value) -> JsonRpcResponse {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params: Some(params),
        };
        self.server
            .handle(request, None, CancellationToken::new())
            .await
            .expect("request carries an id")
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> JsonRpcResponse {
        self.request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    async fn read_resource(&self, uri: &str) -> JsonRpcResponse {
        self.request("resources/read", json!({ "uri": uri })).await
    }
}

fn flu_vocabulary() -> MockVocabulary {
    MockVocabulary::new().with_concepts(vec![
        test_concept(4171852, "Influenza", Domain::Condition, true),
        test_concept(4171853, "Influenza-like illness", Domain::Condition, true),
        test_concept(900001, "Influenza (non-standard legacy)", Domain::Condition, false),
        test_concept(1503297, "Metformin", Domain::Drug, true),
    ])
}

fn expect_ok(response: &JsonRpcResponse) -> &Value {
    assert!(
        response.error.is_none(),
        "unexpected error: {:?}",
        response.error
    );
    response.result.as_ref().expect("result present")
}

fn expect_error_code(response: &JsonRpcResponse, code: &str) -> Value {
    let error = response.error.as_ref().expect("expected an error");
    let data = error.data.clone().expect("error data present");
    assert_eq!(data["code"], code, "message: {}", error.message);
    data
}

// ---------------------------------------------------------------------------
// Scenario: discover flu

#[tokio::test]
async fn discover_flu_returns_standard_matches_and_metadata() {
    let harness = Harness::with_defaults();

    let response = harness
        .call_tool(
            "discover_concepts",
            json!({
                "query": "influenza",
                "domain": "Condition",
                "standard_only": true,
                "limit": 5
            }),
        )
        .await;

    let result = expect_ok(&response);
    assert_eq!(result["concept_ids"].as_array().unwrap().len(), 2);
    assert_eq!(result["standard_concepts"].as_array().unwrap().len(), 2);
    assert_eq!(result["metadata"]["domain"], "Condition");
    assert_eq!(result["metadata"]["standard_only"], "true");
    assert_eq!(result["metadata"]["limit"], "5");
    for concept in result["concepts"].as_array().unwrap() {
        assert_eq!(concept["standard_concept"], "standard");
    }
}

// ---------------------------------------------------------------------------
// Scenario: count flu patients, dry-run only

#[tokio::test]
async fn count_query_dry_run_populates_cost_without_rows() {
    let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery)
        .with_validation(SqlValidationResult::valid(1_000_000_000, 0.005))
        .build();
    let harness = Harness::new(ServerConfig::default(), backend, flu_vocabulary());

    let response = harness
        .call_tool(
            "query_omop",
            json!({
                "query_type": "count",
                "concept_ids": [4171852, 4171853],
                "domain": "Condition",
                "backend": "bigquery",
                "execute": false
            }),
        )
        .await;

    let result = expect_ok(&response);
    let sql = result["sql"].as_str().unwrap();
    assert!(sql.contains("COUNT(DISTINCT person_id)"));
    assert!(sql.contains("`proj.cdm.condition_occurrence`"));
    assert!(sql.contains("IN (4171852, 4171853)"));
    assert_eq!(result["estimated_cost_usd"], 0.005);
    assert!(result.get("results").is_none());

    // Dry-run happened, execution did not
    assert_eq!(harness.backend.validate_count(), 1);
    assert_eq!(harness.backend.execute_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: cost cap triggers

#[tokio::test]
async fn cost_cap_blocks_execution_with_details() {
    let backend = MockBackend::builder("bigquery", SqlDialect::BigQuery)
        .with_validation(SqlValidationResult::valid(5_000_000_000_000, 5.0))
        .build();
    let mut config = ServerConfig::default();
    config.max_query_cost_usd = 1.0;
    let harness = Harness::new(config, backend, flu_vocabulary());

    let response = harness
        .call_tool(
            "query_omop",
            json!({
                "query_type": "count",
                "concept_ids": [4171852, 4171853],
                "domain": "Condition",
                "execute": true
            }),
        )
        .await;

    let data = expect_error_code(&response, "COST_LIMIT_EXCEEDED");
    assert_eq!(data["details"]["estimated_cost_usd"], 5.0);
    assert_eq!(data["details"]["limit_usd"], 1.0);
    // The SQL that would have run rides along for inspection
    assert!(data["details"]["sql"].as_str().unwrap().contains("COUNT"));
    assert_eq!(harness.backend.execute_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: cohort generation

#[tokio::test]
async fn cohort_sql_has_three_ctes_and_qualify_dedup() {
    let harness = Harness::with_defaults();

    let response = harness
        .call_tool(
            "generate_cohort_sql",
            json!({
                "exposure_ids": [1503297],
                "outcome_ids": [46271022],
                "pre_outcome_days": 90,
                "backend": "bigquery"
            }),
        )
        .await;

    let result = expect_ok(&response);
    let sql = result["sql"].as_str().unwrap();
    assert!(sql.contains("WITH exposure AS"));
    assert!(sql.contains("outcome AS"));
    assert!(sql.contains("cohort AS"));
    assert!(sql.contains("ON e.person_id = o.person_id"));
    assert!(sql.contains("DATE_DIFF(outcome_date, exposure_date, DAY) <= 90"));
    assert!(sql.contains(
        "QUALIFY ROW_NUMBER() OVER (PARTITION BY person_id ORDER BY exposure_date) = 1"
    ));
    assert_eq!(result["exposure_concept_count"], 1);
    assert_eq!(result["outcome_concept_count"], 1);
    assert_eq!(result["validation"]["valid"], true);

    // This tool never executes
    assert_eq!(harness.backend.execute_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: mutation rejection

#[tokio::test]
async fn mutation_statement_never_reaches_the_driver() {
    let harness = Harness::with_defaults();

    let response = harness
        .call_tool("select_query", json!({ "sql": "DELETE FROM person" }))
        .await;

    expect_error_code(&response, "SECURITY_VIOLATION");
    assert_eq!(harness.backend.validate_count(), 0);
    assert_eq!(harness.backend.execute_count(), 0);
}

#[tokio::test]
async fn every_forbidden_keyword_is_rejected() {
    let harness = Harness::with_defaults();

    for keyword in omop_mcp_sql::FORBIDDEN_KEYWORDS {
        let sql = format!("{keyword} something FROM person");
        let response = harness.call_tool("select_query", json!({ "sql": sql })).await;
        expect_error_code(&response, "SECURITY_VIOLATION");
    }
    assert_eq!(harness.backend.execute_count(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: pagination via search://

#[tokio::test]
async fn search_resource_pages_exactly_once_through_all_matches() {
    let diabetes: Vec<_> = (1..=7)
        .map(|i| {
            test_concept(
                201820 + i,
                &format!("Type 2 diabetes variant {i}"),
                Domain::Condition,
                true,
            )
        })
        .collect();
    let harness = Harness::new(
        ServerConfig::default(),
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
        MockVocabulary::new().with_concepts(diabetes),
    );

    let mut uri = "search://?query=diabetes&page_size=2".to_string();
    let mut page_sizes = Vec::new();
    let mut seen_ids = Vec::new();

    loop {
        let response = harness.read_resource(&uri).await;
        let result = expect_ok(&response);
        let text = result["contents"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();

        let concepts = body["concepts"].as_array().unwrap();
        page_sizes.push(concepts.len());
        for concept in concepts {
            seen_ids.push(concept["concept_id"].as_i64().unwrap());
        }

        match body["next_cursor"].as_str() {
            Some(cursor) => {
                uri = format!("search://?query=diabetes&page_size=2&cursor={cursor}");
            }
            None => break,
        }
    }

    assert_eq!(page_sizes, vec![2, 2, 2, 1]);
    let mut sorted = seen_ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 7, "each concept exactly once: {seen_ids:?}");
}

#[tokio::test]
async fn malformed_cursor_is_invalid_request() {
    let harness = Harness::with_defaults();
    let response = harness
        .read_resource("search://?query=flu&cursor=page:two")
        .await;
    expect_error_code(&response, "INVALID_REQUEST");
}

// ---------------------------------------------------------------------------
// Invariants: PHI gate and patient-list gate

#[tokio::test]
async fn phi_gate_follows_phi_mode() {
    let sql = "SELECT person_source_value FROM person";

    let harness = Harness::with_defaults();
    let response = harness.call_tool("select_query", json!({ "sql": sql })).await;
    expect_error_code(&response, "SECURITY_VIOLATION");
    assert_eq!(harness.backend.execute_count(), 0);

    let mut config = ServerConfig::default();
    config.phi_mode = true;
    let harness = Harness::new(
        config,
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
        flu_vocabulary(),
    );
    let response = harness.call_tool("select_query", json!({ "sql": sql })).await;
    expect_ok(&response);
    assert_eq!(harness.backend.execute_count(), 1);
}

#[tokio::test]
async fn list_patients_requires_explicit_opt_in() {
    let harness = Harness::with_defaults();
    let response = harness
        .call_tool(
            "query_omop",
            json!({
                "query_type": "list_patients",
                "concept_ids": [4171852],
                "domain": "Condition"
            }),
        )
        .await;
    expect_error_code(&response, "SECURITY_VIOLATION");

    let mut config = ServerConfig::default();
    config.allow_patient_list = true;
    let harness = Harness::new(
        config,
        MockBackend::builder("bigquery", SqlDialect::BigQuery)
            .with_rows(vec![row(&[("person_id", json!(17))])])
            .build(),
        flu_vocabulary(),
    );
    let response = harness
        .call_tool(
            "query_omop",
            json!({
                "query_type": "list_patients",
                "concept_ids": [4171852],
                "domain": "Condition"
            }),
        )
        .await;
    let result = expect_ok(&response);
    assert!(result["sql"].as_str().unwrap().contains("SELECT DISTINCT person_id"));
    assert_eq!(result["row_count"], 1);
}

// ---------------------------------------------------------------------------
// Invariants: row limits

#[tokio::test]
async fn missing_limit_is_injected_before_execution() {
    let harness = Harness::with_defaults();
    let response = harness
        .call_tool(
            "select_query",
            json!({ "sql": "SELECT person_id FROM person", "limit": 50 }),
        )
        .await;
    let result = expect_ok(&response);
    assert!(result["sql"].as_str().unwrap().ends_with("LIMIT 50"));

    let executed = harness.backend.executed_sql();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].ends_with("LIMIT 50"));
}

#[tokio::test]
async fn oversized_limit_fails_before_execution() {
    let harness = Harness::with_defaults();
    let response = harness
        .call_tool(
            "select_query",
            json!({ "sql": "SELECT person_id FROM person LIMIT 50000" }),
        )
        .await;
    expect_error_code(&response, "INVALID_REQUEST");
    assert_eq!(harness.backend.execute_count(), 0);
}

// ---------------------------------------------------------------------------
// Invariants: strict table validation

#[tokio::test]
async fn strict_mode_rejects_non_omop_tables() {
    let mut config = ServerConfig::default();
    config.strict_table_validation = true;
    let harness = Harness::new(
        config,
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
        flu_vocabulary(),
    );

    let response = harness
        .call_tool(
            "select_query",
            json!({ "sql": "SELECT * FROM internal_audit_log" }),
        )
        .await;
    expect_error_code(&response, "SECURITY_VIOLATION");

    let response = harness
        .call_tool(
            "select_query",
            json!({ "sql": "SELECT person_id FROM person" }),
        )
        .await;
    expect_ok(&response);
}

// ---------------------------------------------------------------------------
// Invariant: execution timeout

#[tokio::test]
async fn slow_execution_times_out() {
    let mut config = ServerConfig::default();
    config.query_timeout_sec = 1;
    let harness = Harness::new(
        config,
        MockBackend::builder("bigquery", SqlDialect::BigQuery)
            .with_latency(std::time::Duration::from_secs(30))
            .build(),
        flu_vocabulary(),
    );

    let response = harness
        .call_tool(
            "select_query",
            json!({ "sql": "SELECT person_id FROM person", "validate": false }),
        )
        .await;
    expect_error_code(&response, "TIMEOUT");
}

// ---------------------------------------------------------------------------
// Invariant: capability listing

#[tokio::test]
async fn capabilities_resource_lists_every_registered_backend() {
    let harness = Harness::with_defaults();
    let response = harness.read_resource("capabilities://").await;
    let result = expect_ok(&response);
    let body: Value =
        serde_json::from_str(result["contents"][0]["text"].as_str().unwrap()).unwrap();

    assert_eq!(body["default_backend"], "bigquery");
    let backends = body["backends"].as_array().unwrap();
    let bigquery = backends
        .iter()
        .find(|b| b["name"] == "bigquery")
        .expect("registered backend listed");
    assert_eq!(bigquery["dialect"], "bigquery");
    let allowed = ["dry_run", "cost_estimate", "execute", "explain", "translate", "local"];
    for feature in bigquery["features"].as_array().unwrap() {
        assert!(allowed.contains(&feature.as_str().unwrap()));
    }
}

// ---------------------------------------------------------------------------
// Concept resource

#[tokio::test]
async fn concept_resource_round_trips_and_misses_cleanly() {
    let harness = Harness::with_defaults();

    let response = harness.read_resource("concept://4171852").await;
    let result = expect_ok(&response);
    let body: Value =
        serde_json::from_str(result["contents"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(body["concept_id"], 4171852);
    assert_eq!(body["concept_name"], "Influenza");

    let response = harness.read_resource("concept://999999999").await;
    expect_error_code(&response, "NOT_FOUND");

    let response = harness.read_resource("concept://abc").await;
    expect_error_code(&response, "INVALID_REQUEST");
}

// ---------------------------------------------------------------------------
// Auth hook

#[tokio::test]
async fn auth_rejects_tool_calls_without_a_token() {
    let mut config = ServerConfig::default();
    config.oauth_issuer = Some("https://issuer.example".to_string());
    config.oauth_audience = Some("omop-mcp".to_string());
    config.oauth_shared_secret = Some("s3cret".to_string());
    let harness = Harness::new(
        config,
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
        flu_vocabulary(),
    );

    let response = harness
        .call_tool("discover_concepts", json!({ "query": "influenza" }))
        .await;
    expect_error_code(&response, "UNAUTHENTICATED");

    // Non-tool methods stay open
    let response = harness.request("tools/list", json!({})).await;
    expect_ok(&response);
}

// ---------------------------------------------------------------------------
// Protocol surface

#[tokio::test]
async fn initialize_advertises_all_three_capability_groups() {
    let harness = Harness::with_defaults();
    let response = harness.request("initialize", json!({})).await;
    let result = expect_ok(&response);
    assert_eq!(result["serverInfo"]["name"], "omop-mcp");
    for group in ["tools", "resources", "prompts"] {
        assert!(result["capabilities"].get(group).is_some());
    }
}

#[tokio::test]
async fn tools_list_matches_dispatch_table() {
    let harness = Harness::with_defaults();
    let response = harness.request("tools/list", json!({})).await;
    let result = expect_ok(&response);
    let names: Vec<&str> = result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();

    for expected in [
        "discover_concepts",
        "get_concept_relationships",
        "query_omop",
        "generate_cohort_sql",
        "get_information_schema",
        "select_query",
        "export_concept_set",
    ] {
        assert!(names.contains(&expected), "{expected} missing from tools/list");
    }
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let harness = Harness::with_defaults();
    let response = harness.request("tools/destroy", json!({})).await;
    let error = response.error.expect("error expected");
    assert_eq!(error.code, -32601);
}

#[tokio::test]
async fn prompt_render_via_dispatch() {
    let harness = Harness::with_defaults();
    let response = harness
        .request(
            "prompts/get",
            json!({
                "name": "query/multi-step",
                "arguments": { "concept_ids": "[4171852]", "domain": "Condition" }
            }),
        )
        .await;
    let result = expect_ok(&response);
    let text = result["messages"][0]["content"]["text"].as_str().unwrap();
    assert!(text.contains("execute=false"));
    assert!(text.contains("Never skip the dry run"));
}

// ---------------------------------------------------------------------------
// Relationships tool

#[tokio::test]
async fn relationships_filter_by_kind() {
    use omop_mcp_core::model::Relationship;

    let vocabulary = flu_vocabulary().with_relationships(
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
                concept_id_2: 4000321,
                relationship_id: "Is a".to_string(),
                valid_start_date: None,
                valid_end_date: None,
            },
        ],
    );
    let harness = Harness::new(
        ServerConfig::default(),
        MockBackend::builder("bigquery", SqlDialect::BigQuery).build(),
        vocabulary,
    );

    let response = harness
        .call_tool(
            "get_concept_relationships",
            json!({ "concept_id": 900001, "relationship_id": "Maps to" }),
        )
        .await;
    let result = expect_ok(&response);
    assert_eq!(result["count"], 1);
    assert_eq!(result["relationships"][0]["concept_id_2"], 4171852);
}

// ---------------------------------------------------------------------------
// Information schema tool

#[tokio::test]
async fn information_schema_flags_standard_columns() {
    use omop_mcp_core::omop::{SchemaMap, TableInfo};

    let mut tables = SchemaMap::new();
    tables.insert(
        "person".to_string(),
        TableInfo {
            columns: vec![
                "person_id".to_string(),
                "gender_concept_id".to_string(),
                "custom_site_flag".to_string(),
            ],
            date_columns: vec![],
        },
    );
    let harness = Harness::new(
        ServerConfig::default(),
        MockBackend::builder("bigquery", SqlDialect::BigQuery)
            .with_tables(tables)
            .build(),
        flu_vocabulary(),
    );

    let response = harness
        .call_tool("get_information_schema", json!({ "table_name": "person" }))
        .await;
    let result = expect_ok(&response);
    let columns = result["tables"]["person"]["columns"].as_array().unwrap();

    let standard: Vec<(&str, bool)> = columns
        .iter()
        .map(|c| (c["name"].as_str().unwrap(), c["standard"].as_bool().unwrap()))
        .collect();
    assert!(standard.contains(&("person_id", true)));
    assert!(standard.contains(&("custom_site_flag", false)));

    let response = harness
        .call_tool("get_information_schema", json!({ "table_name": "nonexistent" }))
        .await;
    expect_error_code(&response, "NOT_FOUND");
}
