//! Warehouse backend drivers
//!
//! Every warehouse is reached through the [`OmopBackend`] trait: dialect
//! helpers for SQL generation, schema discovery, side-effect-free
//! validation, and guarded execution. The registry owns one lazily
//! constructed driver per backend name for the life of the process.
//!
//! Warehouse SDKs are compiled in via cargo features (`bigquery`,
//! `snowflake`, `postgres`, `embedded`); a driver whose feature is off
//! reports a configuration error explaining the rebuild flag.

pub mod bigquery;
pub mod driver;
pub mod duckdb;
pub mod fragments;
pub mod mock;
pub mod postgres;
pub mod registry;
pub mod snowflake;

pub use self::bigquery::BigQueryBackend;
pub use self::driver::{BackendError, OmopBackend};
pub use self::duckdb::DuckDbBackend;
pub use self::mock::{MockBackend, MockBackendBuilder};
pub use self::postgres::PostgresBackend;
pub use self::registry::BackendRegistry;
pub use self::snowflake::SnowflakeBackend;
