//! Server configuration (omop-mcp.toml + environment overrides)
//!
//! Settings load in three layers: built-in defaults, an optional TOML file,
//! then environment variables. The recognized key set is closed; unknown
//! environment keys are ignored, malformed values fail the load with a
//! diagnostic naming the offending key.

use crate::omop;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// BigQuery connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigQueryConfig {
    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub dataset: String,

    /// Service account key: a file path or inline JSON. None uses
    /// Application Default Credentials.
    #[serde(default)]
    pub credentials: Option<String>,

    /// On-demand price per TB scanned, applied to dry-run byte counts
    #[serde(default = "default_price_per_tb")]
    pub price_per_tb_usd: f64,
}

fn default_price_per_tb() -> f64 {
    5.0
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            dataset: String::new(),
            credentials: None,
            price_per_tb_usd: default_price_per_tb(),
        }
    }
}

/// Snowflake connection settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub warehouse: String,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_snowflake_schema")]
    pub schema: String,
}

fn default_snowflake_schema() -> String {
    "PUBLIC".to_string()
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_pg_host")]
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_pg_schema")]
    pub schema: String,
}

fn default_pg_host() -> String {
    "localhost".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_schema() -> String {
    "public".to_string()
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: default_pg_schema(),
        }
    }
}

/// DuckDB settings (in-memory by default)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuckDbConfig {
    #[serde(default = "default_duckdb_path")]
    pub path: String,
    #[serde(default = "default_duckdb_schema")]
    pub schema: String,
}

fn default_duckdb_path() -> String {
    ":memory:".to_string()
}

fn default_duckdb_schema() -> String {
    "main".to_string()
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            path: default_duckdb_path(),
            schema: default_duckdb_schema(),
        }
    }
}

/// Main configuration record, effectively immutable after load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Cap applied to estimated cost before execution
    #[serde(default = "default_max_query_cost")]
    pub max_query_cost_usd: f64,

    /// Hard wall-clock limit for execution, seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_sec: u64,

    /// Gates `list_patients` and any query exposing raw patient ids
    #[serde(default)]
    pub allow_patient_list: bool,

    /// When false, columns on the PHI blocklist are rejected
    #[serde(default)]
    pub phi_mode: bool,

    #[serde(default = "default_row_limit")]
    pub default_row_limit: usize,

    #[serde(default = "default_max_row_limit")]
    pub max_row_limit: usize,

    /// When true, only tables on the OMOP allowlist may appear in SQL
    #[serde(default)]
    pub strict_table_validation: bool,

    #[serde(default = "default_allowed_tables")]
    pub omop_allowed_tables: Vec<String>,

    #[serde(default = "default_blocked_columns")]
    pub omop_blocked_columns: Vec<String>,

    /// Default backend name
    #[serde(default = "default_backend_type")]
    pub backend_type: String,

    #[serde(default = "default_vocabulary_base_url")]
    pub vocabulary_base_url: String,

    #[serde(default = "default_vocabulary_timeout")]
    pub vocabulary_timeout_sec: u64,

    #[serde(default = "default_vocabulary_cache_size")]
    pub vocabulary_cache_size: usize,

    /// Bearer-token verification is enabled when both issuer and audience
    /// are present
    #[serde(default)]
    pub oauth_issuer: Option<String>,

    #[serde(default)]
    pub oauth_audience: Option<String>,

    /// HS256 shared secret for bearer verification. When absent, tokens are
    /// checked for issuer/audience/expiry only, for deployments where the
    /// signature is verified upstream.
    #[serde(default)]
    pub oauth_shared_secret: Option<String>,

    // Per-backend connection settings; tables stay below the scalar keys so
    // the TOML form serializes cleanly
    #[serde(default)]
    pub bigquery: BigQueryConfig,

    #[serde(default)]
    pub snowflake: SnowflakeConfig,

    #[serde(default)]
    pub postgres: PostgresConfig,

    #[serde(default)]
    pub duckdb: DuckDbConfig,
}

fn default_max_query_cost() -> f64 {
    1.0
}

fn default_query_timeout() -> u64 {
    30
}

fn default_row_limit() -> usize {
    1000
}

fn default_max_row_limit() -> usize {
    10000
}

fn default_backend_type() -> String {
    "bigquery".to_string()
}

fn default_allowed_tables() -> Vec<String> {
    omop::ALLOWED_TABLES.iter().map(|s| s.to_string()).collect()
}

fn default_blocked_columns() -> Vec<String> {
    omop::BLOCKED_COLUMNS.iter().map(|s| s.to_string()).collect()
}

fn default_vocabulary_base_url() -> String {
    "https://api.omophub.com/v1".to_string()
}

fn default_vocabulary_timeout() -> u64 {
    30
}

fn default_vocabulary_cache_size() -> usize {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        // All defaults flow through the serde default functions so the TOML
        // and programmatic paths can never disagree.
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl ServerConfig {
    /// Load config from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Load config from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from defaults + an optional file + process environment
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let vars: HashMap<String, String> = std::env::vars().collect();
        config.apply_overrides(&vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from a key/value map.
    ///
    /// The key set is closed; keys outside it are ignored. A present but
    /// malformed value is an error naming the key.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
            }
        }

        fn parse_list(value: &str) -> Vec<String> {
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }

        for (key, value) in vars {
            match key.as_str() {
                "MAX_QUERY_COST_USD" => self.max_query_cost_usd = parse(key, value)?,
                "QUERY_TIMEOUT_SEC" => self.query_timeout_sec = parse(key, value)?,
                "ALLOW_PATIENT_LIST" => self.allow_patient_list = parse_bool(key, value)?,
                "PHI_MODE" => self.phi_mode = parse_bool(key, value)?,
                "DEFAULT_ROW_LIMIT" => self.default_row_limit = parse(key, value)?,
                "MAX_ROW_LIMIT" => self.max_row_limit = parse(key, value)?,
                "STRICT_TABLE_VALIDATION" => {
                    self.strict_table_validation = parse_bool(key, value)?
                }
                "OMOP_ALLOWED_TABLES" => self.omop_allowed_tables = parse_list(value),
                "OMOP_BLOCKED_COLUMNS" => self.omop_blocked_columns = parse_list(value),
                "BACKEND_TYPE" => self.backend_type = value.trim().to_lowercase(),
                "BIGQUERY_PROJECT" => self.bigquery.project = value.clone(),
                "BIGQUERY_DATASET" => self.bigquery.dataset = value.clone(),
                "BIGQUERY_CREDENTIALS" => self.bigquery.credentials = Some(value.clone()),
                "BIGQUERY_PRICE_PER_TB_USD" => {
                    self.bigquery.price_per_tb_usd = parse(key, value)?
                }
                "SNOWFLAKE_ACCOUNT" => self.snowflake.account = value.clone(),
                "SNOWFLAKE_USER" => self.snowflake.user = value.clone(),
                "SNOWFLAKE_PASSWORD" => self.snowflake.password = value.clone(),
                "SNOWFLAKE_WAREHOUSE" => self.snowflake.warehouse = value.clone(),
                "SNOWFLAKE_DATABASE" => self.snowflake.database = value.clone(),
                "SNOWFLAKE_SCHEMA" => self.snowflake.schema = value.clone(),
                "POSTGRES_HOST" => self.postgres.host = value.clone(),
                "POSTGRES_PORT" => self.postgres.port = parse(key, value)?,
                "POSTGRES_DATABASE" => self.postgres.database = value.clone(),
                "POSTGRES_USER" => self.postgres.user = value.clone(),
                "POSTGRES_PASSWORD" => self.postgres.password = value.clone(),
                "POSTGRES_SCHEMA" => self.postgres.schema = value.clone(),
                "DUCKDB_PATH" => self.duckdb.path = value.clone(),
                "DUCKDB_SCHEMA" => self.duckdb.schema = value.clone(),
                "VOCABULARY_BASE_URL" => self.vocabulary_base_url = value.clone(),
                "VOCABULARY_TIMEOUT_SEC" => self.vocabulary_timeout_sec = parse(key, value)?,
                "VOCABULARY_CACHE_SIZE" => self.vocabulary_cache_size = parse(key, value)?,
                "OAUTH_ISSUER" => self.oauth_issuer = Some(value.clone()),
                "OAUTH_AUDIENCE" => self.oauth_audience = Some(value.clone()),
                "OAUTH_SHARED_SECRET" => self.oauth_shared_secret = Some(value.clone()),
                _ => {}
            }
        }
        Ok(())
    }

    /// Cross-field sanity checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_query_cost_usd < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "max_query_cost_usd".to_string(),
                value: self.max_query_cost_usd.to_string(),
            });
        }
        if self.query_timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "query_timeout_sec".to_string(),
                value: "0".to_string(),
            });
        }
        if self.default_row_limit == 0 || self.max_row_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "default_row_limit/max_row_limit".to_string(),
                value: "0".to_string(),
            });
        }
        if self.default_row_limit > self.max_row_limit {
            return Err(ConfigError::InvalidValue {
                key: "default_row_limit".to_string(),
                value: format!(
                    "{} exceeds max_row_limit {}",
                    self.default_row_limit, self.max_row_limit
                ),
            });
        }
        if self.vocabulary_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "vocabulary_cache_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Auth is on only when both halves of the verifier config are present
    pub fn auth_enabled(&self) -> bool {
        self.oauth_issuer.is_some() && self.oauth_audience.is_some()
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.max_query_cost_usd, 1.0);
        assert_eq!(config.query_timeout_sec, 30);
        assert!(!config.allow_patient_list);
        assert!(!config.phi_mode);
        assert_eq!(config.default_row_limit, 1000);
        assert_eq!(config.max_row_limit, 10000);
        assert_eq!(config.backend_type, "bigquery");
        assert_eq!(config.bigquery.price_per_tb_usd, 5.0);
        assert_eq!(config.vocabulary_cache_size, 1000);
        assert!(!config.auth_enabled());
    }

    #[test]
    fn toml_roundtrip() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = ServerConfig::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ServerConfig::default();
        let vars: HashMap<String, String> = [
            ("MAX_QUERY_COST_USD", "2.5"),
            ("PHI_MODE", "true"),
            ("BACKEND_TYPE", "DuckDB"),
            ("BIGQUERY_PROJECT", "my-project"),
            ("OMOP_ALLOWED_TABLES", "person, condition_occurrence"),
            ("SOME_UNRELATED_KEY", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_overrides(&vars).unwrap();
        assert_eq!(config.max_query_cost_usd, 2.5);
        assert!(config.phi_mode);
        assert_eq!(config.backend_type, "duckdb");
        assert_eq!(config.bigquery.project, "my-project");
        assert_eq!(
            config.omop_allowed_tables,
            vec!["person".to_string(), "condition_occurrence".to_string()]
        );
    }

    #[test]
    fn malformed_env_value_names_the_key() {
        let mut config = ServerConfig::default();
        let vars: HashMap<String, String> =
            [("QUERY_TIMEOUT_SEC".to_string(), "soon".to_string())].into();

        let err = config.apply_overrides(&vars).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "QUERY_TIMEOUT_SEC"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validate_rejects_inverted_row_limits() {
        let mut config = ServerConfig::default();
        config.default_row_limit = 20000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn auth_requires_both_fields() {
        let mut config = ServerConfig::default();
        config.oauth_issuer = Some("https://issuer.example".to_string());
        assert!(!config.auth_enabled());
        config.oauth_audience = Some("omop-mcp".to_string());
        assert!(config.auth_enabled());
    }
}
