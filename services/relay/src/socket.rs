use crate::config::ApiConfig;
use crate::hub::{Registration, RelayHub};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Time a closing connection's writer gets to flush its queue
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Create the relay router
pub fn create_router(hub: Arc<RelayHub>, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/socket", get(socket_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(hub)
}

async fn health_check(State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "rehab-relay",
        "connections": hub.active_connections()
    }))
}

/// GET /socket - join the broadcast relay
async fn socket_upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RelayHub>) {
    let (registration, outbound) = hub.register();
    let (sender, receiver) = socket.split();
    relay_connection(hub, registration, outbound, receiver, sender).await;
}

/// Drive one member of the relay until its peer goes away.
///
/// Text frames from `incoming` are broadcast to the other members; messages
/// queued for this member are written to `sink` by a separate task. On exit
/// the member leaves the set, and the writer gets [`CLOSE_GRACE`] to flush
/// what is left (including a pending close reply) before it is aborted.
async fn relay_connection<St, Si>(
    hub: Arc<RelayHub>,
    registration: Registration,
    mut outbound: mpsc::Receiver<String>,
    mut incoming: St,
    mut sink: Si,
) where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
    Si: Sink<Message> + Unpin + Send + 'static,
{
    let id = registration.id();
    info!(connection_id = %id, "WebSocket connection established");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!(connection_id = %id, payload = %text, "Received message");
                    hub.broadcast(id, &text);
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| f.code);
                    let reason = frame.as_ref().map(|f| f.reason.to_string());
                    info!(connection_id = %id, code = ?code, reason = ?reason, "Close frame received");
                    break;
                }
                // Binary, ping and pong frames are not relayed
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = &mut writer => {
                debug!(connection_id = %id, "Writer finished");
                writer_done = true;
                break;
            }
        }
    }

    // Removing the member drops the last queue sender, so the writer drains and exits
    drop(registration);
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        warn!(connection_id = %id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    info!(connection_id = %id, "WebSocket connection closed");
}

/// Start the relay server
pub async fn start_relay_server(
    hub: Arc<RelayHub>,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(hub, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting relay server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Relay server error")?;

    Ok(())
}
