//! MCP JSON-RPC message shapes
//!
//! The server speaks JSON-RPC 2.0 over both transports. Domain errors keep
//! their stable taxonomy code inside `error.data` so callers can branch
//! without parsing messages.

use omop_mcp_core::error::{ErrorCode, ServerError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision this server implements
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "omop-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    /// Absent for notifications, which get no response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Base of the implementation-defined range used for domain errors
const SERVER_ERROR: i64 = -32000;

fn jsonrpc_code(code: ErrorCode) -> i64 {
    match code {
        ErrorCode::InvalidRequest => INVALID_PARAMS,
        ErrorCode::NotFound => SERVER_ERROR - 1,
        ErrorCode::VocabularyError => SERVER_ERROR - 2,
        ErrorCode::BackendUnavailable => SERVER_ERROR - 3,
        ErrorCode::SecurityViolation => SERVER_ERROR - 4,
        ErrorCode::ValidationFailed => SERVER_ERROR - 5,
        ErrorCode::CostLimitExceeded => SERVER_ERROR - 6,
        ErrorCode::Timeout => SERVER_ERROR - 7,
        ErrorCode::DialectError => SERVER_ERROR - 8,
        ErrorCode::Unauthenticated => SERVER_ERROR - 9,
        ErrorCode::Unauthorized => SERVER_ERROR - 10,
    }
}

impl From<ServerError> for JsonRpcError {
    fn from(error: ServerError) -> Self {
        let mut data = serde_json::json!({ "code": error.code.as_str() });
        if let Some(details) = &error.details {
            data["details"] = details.clone();
        }
        Self {
            code: jsonrpc_code(error.code),
            message: error.message,
            data: Some(data),
        }
    }
}

impl JsonRpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: PARSE_ERROR,
            message: message.into(),
            data: None,
        }
    }
}
