//! Static, parameterized prompt templates
//!
//! Each prompt declares its argument schema; rendering with valid arguments
//! yields a message list for an LLM consumer. Missing required arguments
//! are an `InvalidRequest`.

use omop_mcp_core::error::ServerError;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct PromptDefinition {
    pub id: &'static str,
    pub description: &'static str,
    pub arguments: &'static [PromptArgument],
}

pub const PROMPTS: &[PromptDefinition] = &[
    PromptDefinition {
        id: "cohort/sql",
        description: "Guide generation of OMOP cohort SQL in a target dialect with safety notes",
        arguments: &[
            PromptArgument {
                name: "exposure",
                description: "Exposure description or concept ids",
                required: true,
            },
            PromptArgument {
                name: "outcome",
                description: "Outcome description or concept ids",
                required: true,
            },
            PromptArgument {
                name: "time_window",
                description: "Maximum days between exposure and outcome",
                required: true,
            },
            PromptArgument {
                name: "dialect",
                description: "Target SQL dialect (bigquery, snowflake, duckdb, postgres)",
                required: true,
            },
        ],
    },
    PromptDefinition {
        id: "analysis/discovery",
        description: "Stepwise concept-discovery procedure for a clinical question",
        arguments: &[
            PromptArgument {
                name: "question",
                description: "The clinical question to investigate",
                required: true,
            },
            PromptArgument {
                name: "domains",
                description: "Comma-separated OMOP domains to search",
                required: false,
            },
        ],
    },
    PromptDefinition {
        id: "query/multi-step",
        description: "The dry-run, cost-check, execute protocol for an analytical query",
        arguments: &[
            PromptArgument {
                name: "concept_ids",
                description: "Concept ids to query",
                required: true,
            },
            PromptArgument {
                name: "domain",
                description: "OMOP domain of the concept ids",
                required: true,
            },
        ],
    },
];

pub fn find(id: &str) -> Option<&'static PromptDefinition> {
    PROMPTS.iter().find(|p| p.id == id)
}

/// Prompt listing in MCP shape
pub fn list() -> Value {
    json!({
        "prompts": PROMPTS.iter().map(|p| json!({
            "name": p.id,
            "description": p.description,
            "arguments": p.arguments.iter().map(|a| json!({
                "name": a.name,
                "description": a.description,
                "required": a.required,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>()
    })
}

/// Render a prompt into its message list
pub fn render(id: &str, arguments: &Map<String, Value>) -> Result<Value, ServerError> {
    let definition =
        find(id).ok_or_else(|| ServerError::not_found(format!("unknown prompt: {id}")))?;

    let mut values: Map<String, Value> = Map::new();
    for argument in definition.arguments {
        match arguments.get(argument.name) {
            Some(value) => {
                values.insert(argument.name.to_string(), value.clone());
            }
            None if argument.required => {
                return Err(ServerError::invalid_request(format!(
                    "prompt '{id}' requires argument '{}'",
                    argument.name
                )));
            }
            None => {}
        }
    }

    let text = match id {
        "cohort/sql" => cohort_sql_text(&values),
        "analysis/discovery" => discovery_text(&values),
        "query/multi-step" => multi_step_text(&values),
        _ => unreachable!("find() already matched"),
    };

    Ok(json!({
        "description": definition.description,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": text },
        }]
    }))
}

fn as_text(values: &Map<String, Value>, key: &str) -> String {
    match values.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn cohort_sql_text(values: &Map<String, Value>) -> String {
    format!(
        "Generate OMOP CDM cohort SQL in the {dialect} dialect.\n\
         \n\
         Exposure: {exposure}\n\
         Outcome: {outcome}\n\
         Time window: outcome within {window} days after first exposure.\n\
         \n\
         Requirements:\n\
         1. Use three CTEs named exposure, outcome, and cohort.\n\
         2. Select DISTINCT (person_id, event date) in the exposure and outcome CTEs.\n\
         3. Join on person_id, require exposure_date <= outcome_date, and bound the \
         gap with the dialect's date-difference function.\n\
         4. Keep only the first exposure per person (QUALIFY ROW_NUMBER() where the \
         dialect supports it, a ranked subquery otherwise).\n\
         \n\
         Safety notes: emit a single read-only SELECT; never reference *_source_value \
         columns; validate with a dry run before any execution and respect the \
         configured cost cap.",
        dialect = as_text(values, "dialect"),
        exposure = as_text(values, "exposure"),
        outcome = as_text(values, "outcome"),
        window = as_text(values, "time_window"),
    )
}

fn discovery_text(values: &Map<String, Value>) -> String {
    let domains = as_text(values, "domains");
    let domain_line = if domains.is_empty() {
        "all clinically relevant domains".to_string()
    } else {
        domains
    };
    format!(
        "Find the OMOP standard concepts needed to answer:\n{question}\n\
         \n\
         Procedure:\n\
         1. Extract the clinical terms from the question.\n\
         2. Call discover_concepts for each term over {domains}, standard_only=true.\n\
         3. Inspect non-standard matches with get_concept_relationships and follow \
         'Maps to' edges to their standard equivalents.\n\
         4. Collect the final concept_id list and echo the filters you used.",
        question = as_text(values, "question"),
        domains = domain_line,
    )
}

fn multi_step_text(values: &Map<String, Value>) -> String {
    format!(
        "Run an analytical query over concept ids {ids} in the {domain} domain, \
         strictly in this order:\n\
         1. Call query_omop with execute=false and inspect the generated SQL.\n\
         2. Check estimated_cost_usd from the dry run against the configured cap.\n\
         3. Only if the estimate is acceptable, call query_omop again with \
         execute=true and the same arguments.\n\
         Never skip the dry run; report the SQL alongside any numbers you return.",
        ids = as_text(values, "concept_ids"),
        domain = as_text(values, "domain"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn all_prompts_listed() {
        let listing = list();
        let prompts = listing["prompts"].as_array().unwrap();
        assert_eq!(prompts.len(), 3);
        assert!(prompts.iter().any(|p| p["name"] == "cohort/sql"));
    }

    #[test]
    fn cohort_prompt_renders_with_arguments() {
        let mut arguments = Map::new();
        arguments.insert("exposure".to_string(), json!("metformin"));
        arguments.insert("outcome".to_string(), json!("lactic acidosis"));
        arguments.insert("time_window".to_string(), json!(90));
        arguments.insert("dialect".to_string(), json!("bigquery"));

        let rendered = render("cohort/sql", &arguments).unwrap();
        let text = rendered["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("metformin"));
        assert!(text.contains("90 days"));
        assert!(text.contains("bigquery"));
    }

    #[test]
    fn missing_required_argument_is_invalid_request() {
        let arguments = Map::new();
        let err = render("cohort/sql", &arguments).unwrap_err();
        assert_eq!(err.code, omop_mcp_core::ErrorCode::InvalidRequest);
    }

    #[test]
    fn unknown_prompt_is_not_found() {
        let err = render("nope/nope", &Map::new()).unwrap_err();
        assert_eq!(err.code, omop_mcp_core::ErrorCode::NotFound);
    }

    #[test]
    fn optional_argument_defaults() {
        let mut arguments = Map::new();
        arguments.insert("question".to_string(), json!("incidence of flu"));
        let rendered = render("analysis/discovery", &arguments).unwrap();
        let text = rendered["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("all clinically relevant domains"));
    }
}
