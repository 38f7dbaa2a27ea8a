//! Backend registry: names to lazily constructed driver singletons
//!
//! The registry owns one driver per backend name for the life of the
//! process. Construction happens on first `get` and is idempotent; the
//! result is cached whether the caller asked by name or fell through to the
//! configured default.

use crate::driver::{BackendError, OmopBackend};
use crate::{BigQueryBackend, DuckDbBackend, PostgresBackend, SnowflakeBackend};
use omop_mcp_core::config::ServerConfig;
use omop_mcp_core::model::{BackendCapability, BackendFeature, BackendStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Backend names the registry can construct from config
pub const KNOWN_BACKENDS: &[&str] = &["bigquery", "snowflake", "duckdb", "postgres"];

pub struct BackendRegistry {
    config: Arc<ServerConfig>,
    drivers: Mutex<HashMap<String, Arc<dyn OmopBackend>>>,
}

impl BackendRegistry {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-register a driver instance under a name. Used by tests to inject
    /// doubles; an injected driver shadows the built-in of the same name.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn OmopBackend>) {
        self.drivers
            .try_lock()
            .expect("register before serving requests")
            .insert(name.into(), backend);
    }

    pub fn default_backend(&self) -> &str {
        &self.config.backend_type
    }

    /// Driver lookup; `None` selects the configured default backend.
    /// The first lookup constructs the driver, later lookups share it.
    pub async fn get(&self, name: Option<&str>) -> Result<Arc<dyn OmopBackend>, BackendError> {
        let name = name.unwrap_or(&self.config.backend_type).to_lowercase();

        let mut drivers = self.drivers.lock().await;
        if let Some(backend) = drivers.get(&name) {
            return Ok(Arc::clone(backend));
        }

        let backend: Arc<dyn OmopBackend> = match name.as_str() {
            "bigquery" => Arc::new(BigQueryBackend::connect(&self.config.bigquery).await?),
            "snowflake" => Arc::new(SnowflakeBackend::connect(&self.config.snowflake)?),
            "postgres" => Arc::new(PostgresBackend::connect(&self.config.postgres).await?),
            "duckdb" => Arc::new(DuckDbBackend::connect(&self.config.duckdb)?),
            other => {
                return Err(BackendError::Config(format!(
                    "unknown backend '{other}'; known backends: {}",
                    KNOWN_BACKENDS.join(", ")
                )))
            }
        };

        drivers.insert(name, Arc::clone(&backend));
        tracing::info!(backend = backend.name(), "backend driver constructed");
        Ok(backend)
    }

    /// Capability listing: every constructed or injected driver plus the
    /// built-ins compiled into this binary.
    pub async fn list(&self) -> Vec<BackendCapability> {
        let mut by_name: HashMap<String, BackendCapability> = builtin_capabilities()
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        for (name, backend) in self.drivers.lock().await.iter() {
            let mut capability = backend.capability();
            capability.name = name.clone();
            by_name.insert(name.clone(), capability);
        }

        let mut capabilities: Vec<BackendCapability> = by_name.into_values().collect();
        capabilities.sort_by(|a, b| a.name.cmp(&b.name));
        capabilities
    }
}

/// Static capabilities for the drivers compiled into this binary
fn builtin_capabilities() -> Vec<BackendCapability> {
    let mut capabilities = Vec::new();

    if cfg!(feature = "bigquery") {
        capabilities.push(BackendCapability {
            name: "bigquery".to_string(),
            dialect: "bigquery".to_string(),
            features: vec![
                BackendFeature::DryRun,
                BackendFeature::CostEstimate,
                BackendFeature::Execute,
                BackendFeature::Translate,
            ],
            status: BackendStatus::Live,
        });
    }
    if cfg!(feature = "snowflake") {
        capabilities.push(BackendCapability {
            name: "snowflake".to_string(),
            dialect: "snowflake".to_string(),
            features: vec![
                BackendFeature::Explain,
                BackendFeature::Execute,
                BackendFeature::Translate,
            ],
            status: BackendStatus::Live,
        });
    }
    if cfg!(feature = "embedded") {
        capabilities.push(BackendCapability {
            name: "duckdb".to_string(),
            dialect: "duckdb".to_string(),
            features: vec![
                BackendFeature::Explain,
                BackendFeature::Execute,
                BackendFeature::Translate,
                BackendFeature::Local,
            ],
            status: BackendStatus::Live,
        });
    }
    if cfg!(feature = "postgres") {
        capabilities.push(BackendCapability {
            name: "postgres".to_string(),
            dialect: "postgres".to_string(),
            features: vec![
                BackendFeature::Explain,
                BackendFeature::Execute,
                BackendFeature::Translate,
            ],
            status: BackendStatus::Beta,
        });
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use omop_mcp_sql::dialect::SqlDialect;
    use pretty_assertions::assert_eq;

    fn registry_with_mock() -> BackendRegistry {
        let mut config = ServerConfig::default();
        config.backend_type = "bigquery".to_string();
        let registry = BackendRegistry::new(Arc::new(config));
        registry.register(
            "bigquery",
            Arc::new(MockBackend::builder("bigquery", SqlDialect::BigQuery).build()),
        );
        registry
    }

    #[tokio::test]
    async fn injected_driver_is_a_singleton() {
        let registry = registry_with_mock();
        let first = registry.get(Some("bigquery")).await.unwrap();
        let second = registry.get(None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_backend_is_an_error() {
        let registry = registry_with_mock();
        let err = registry.get(Some("oracle")).await.unwrap_err();
        match err {
            BackendError::Config(message) => assert!(message.contains("unknown backend")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_includes_registered_drivers() {
        let registry = registry_with_mock();
        let capabilities = registry.list().await;
        let bigquery = capabilities
            .iter()
            .find(|c| c.name == "bigquery")
            .expect("bigquery listed");
        assert_eq!(bigquery.dialect, "bigquery");
        assert!(bigquery.features.contains(&BackendFeature::DryRun));

        // Everything listed is retrievable by name
        for capability in &capabilities {
            assert!(registry.get(Some(&capability.name)).await.is_ok());
        }
    }
}
