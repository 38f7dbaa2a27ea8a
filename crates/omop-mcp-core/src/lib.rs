//! OMOP MCP Core
//!
//! Core domain model with stable, versioned types.
//! Error codes are part of the wire contract - never rename them.

pub mod config;
pub mod error;
pub mod model;
pub mod omop;

pub use config::{
    BigQueryConfig, ConfigError, DuckDbConfig, PostgresConfig, ServerConfig, SnowflakeConfig,
};
pub use error::{ErrorCode, ServerError};
pub use model::{
    BackendCapability, BackendFeature, BackendStatus, CohortSqlResult, Concept,
    ConceptDiscoveryResult, Domain, QueryResult, Relationship, Row, SqlValidationResult,
    StandardConcept,
};
pub use omop::{DomainMapping, SchemaMap, TableInfo};
