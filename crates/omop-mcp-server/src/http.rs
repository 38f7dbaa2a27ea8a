//! HTTP transport with a server-sent-events channel
//!
//! JSON-RPC messages POST to `/mcp`; `/sse` serves the event channel that
//! announces the message endpoint and keeps the connection warm. Bearer
//! tokens ride the Authorization header and are checked by the dispatch
//! layer before any tool runs.

use crate::protocol::JsonRpcRequest;
use crate::server::McpServer;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_message))
        .route("/sse", get(handle_sse))
        .route("/healthz", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

pub async fn serve(server: Arc<McpServer>, port: u16) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP transport ready");

    axum::serve(listener, router(server))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
}

async fn handle_message(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let cancel = CancellationToken::new();
    match server.handle(request, bearer.as_deref(), cancel).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        // Notification: acknowledged without a body
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_sse() -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    // Announce the message endpoint, then rely on keep-alives
    let endpoint = stream::once(async {
        Ok(Event::default().event("endpoint").data("/mcp"))
    });

    Sse::new(endpoint).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
