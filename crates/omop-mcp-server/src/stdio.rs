//! Line-delimited JSON-RPC over standard streams
//!
//! One request per line on stdin, one response per line on stdout. Logs go
//! to stderr so the framing stays clean. EOF shuts the loop down; dropping
//! the per-request cancellation token tears down any in-flight warehouse
//! work.

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(server: Arc<McpServer>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();
    let shutdown = CancellationToken::new();

    tracing::info!("stdio transport ready");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                let cancel = shutdown.child_token();
                server.handle(request, None, cancel).await
            }
            Err(e) => Some(JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::parse_error(format!("invalid JSON-RPC request: {e}")),
            )),
        };

        if let Some(response) = response {
            let mut payload = serde_json::to_vec(&response)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            payload.push(b'\n');
            stdout.write_all(&payload).await?;
            stdout.flush().await?;
        }
    }

    shutdown.cancel();
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
