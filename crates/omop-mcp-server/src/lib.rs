//! OMOP MCP server
//!
//! The request-handling and safety layer: MCP tool/resource/prompt dispatch
//! over stdio or HTTP/SSE, with every SQL-emitting path wrapped by the
//! ordered safety pipeline (read-only guard, table allowlist, PHI column
//! blocklist, row-limit injection, dry-run, cost cap, timed execution).

pub mod auth;
pub mod export;
pub mod http;
pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod safety;
pub mod server;
pub mod stdio;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use server::McpServer;
