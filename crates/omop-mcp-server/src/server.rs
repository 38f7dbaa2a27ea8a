//! Request dispatch over the MCP method surface

use crate::auth::{Principal, TokenVerifier};
use crate::protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use crate::{prompts, resources, tools};
use omop_mcp_backend::BackendRegistry;
use omop_mcp_core::config::ServerConfig;
use omop_mcp_core::error::{ErrorCode, ServerError};
use omop_mcp_vocab::{VocabularyClient, VocabularySource};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct McpServer {
    config: Arc<ServerConfig>,
    registry: Arc<BackendRegistry>,
    vocabulary: Arc<dyn VocabularySource>,
    verifier: Option<TokenVerifier>,
}

impl McpServer {
    /// Production wiring: HTTP vocabulary client plus a registry that
    /// constructs drivers from config on demand.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let verifier = TokenVerifier::from_config(&config);
        let config = Arc::new(config);
        let vocabulary = VocabularyClient::from_config(&config)
            .map_err(|e| ServerError::new(ErrorCode::VocabularyError, e.to_string()))?;
        let registry = Arc::new(BackendRegistry::new(Arc::clone(&config)));

        Ok(Self {
            config,
            registry,
            vocabulary: Arc::new(vocabulary),
            verifier,
        })
    }

    /// Test wiring with injected collaborators
    pub fn with_parts(
        config: Arc<ServerConfig>,
        registry: Arc<BackendRegistry>,
        vocabulary: Arc<dyn VocabularySource>,
    ) -> Self {
        let verifier = TokenVerifier::from_config(&config);
        Self {
            config,
            registry,
            vocabulary,
            verifier,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn vocabulary(&self) -> &dyn VocabularySource {
        self.vocabulary.as_ref()
    }

    /// Handle one JSON-RPC message. Notifications produce no response.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
        bearer: Option<&str>,
        cancel: CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let id = match request.id {
            Some(id) => id,
            None => {
                tracing::debug!(method = %request.method, "notification received");
                return None;
            }
        };

        let started = Instant::now();
        let method = request.method.clone();
        let outcome = self
            .dispatch(&request.method, request.params, bearer, &cancel)
            .await;

        Some(match outcome {
            Ok(result) => {
                tracing::info!(
                    %method,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request handled"
                );
                JsonRpcResponse::success(id, result)
            }
            Err(DispatchError::MethodNotFound) => {
                JsonRpcResponse::failure(id, JsonRpcError::method_not_found(&method))
            }
            Err(DispatchError::Domain(error)) => {
                tracing::warn!(%method, code = error.code.as_str(), error = %error.message, "request failed");
                JsonRpcResponse::failure(id, error.into())
            }
        })
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value, DispatchError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {},
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools::definitions()),
            "tools/call" => {
                let params: ToolCallParams = parse_params(params)?;
                // Auth gate runs before any tool, when configured
                let _principal: Option<Principal> = match &self.verifier {
                    Some(verifier) => Some(verifier.verify(bearer)?),
                    None => None,
                };
                let result =
                    tools::call(self, &params.name, params.arguments, cancel).await?;
                Ok(result)
            }
            "resources/list" => Ok(resources::list()),
            "resources/read" => {
                let params: ResourceReadParams = parse_params(params)?;
                let body = resources::read(self, &params.uri).await?;
                Ok(json!({
                    "contents": [{
                        "uri": params.uri,
                        "mimeType": "application/json",
                        "text": serde_json::to_string(&body).unwrap_or_default(),
                    }]
                }))
            }
            "prompts/list" => Ok(prompts::list()),
            "prompts/get" => {
                let params: PromptGetParams = parse_params(params)?;
                Ok(prompts::render(&params.name, &params.arguments)?)
            }
            _ => Err(DispatchError::MethodNotFound),
        }
    }
}

#[derive(Debug)]
pub enum DispatchError {
    MethodNotFound,
    Domain(ServerError),
}

impl From<ServerError> for DispatchError {
    fn from(error: ServerError) -> Self {
        Self::Domain(error)
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default = "empty_arguments")]
    arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Deserialize)]
struct ResourceReadParams {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct PromptGetParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, ServerError> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| ServerError::invalid_request(format!("invalid params: {e}")))
}
