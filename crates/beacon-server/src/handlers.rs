//! HTTP and WebSocket handlers for the Beacon server.
//!
//! This module owns the shared state, builds the axum router and drives each
//! WebSocket connection through the hub's lifecycle.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::{events, media, trigger};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, DefaultBodyLimit, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_core::Hub;
use beacon_protocol::close_code;
use beacon_store::{JsonFileStore, MediaItem, RecordStore, Trigger};
use beacon_transport::websocket::{write_loop, WebSocketTransport};
use beacon_transport::Transport;
use futures_util::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The realtime hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    /// Media records.
    pub media: Arc<dyn RecordStore<MediaItem>>,
    /// Trigger records.
    pub triggers: Arc<dyn RecordStore<Trigger>>,
}

impl AppState {
    /// Create new app state with the server's event handlers installed.
    #[must_use]
    pub fn new(
        config: Config,
        media: Arc<dyn RecordStore<MediaItem>>,
        triggers: Arc<dyn RecordStore<Trigger>>,
    ) -> Self {
        let hub = Hub::with_config(config.hub_config());
        events::install(&hub);

        Self {
            hub,
            config,
            media,
            triggers,
        }
    }

    /// Create app state backed by the JSON files named in `config`.
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        let media = Arc::new(JsonFileStore::<MediaItem>::new(&config.storage.media_file));
        let triggers = Arc::new(JsonFileStore::<Trigger>::new(&config.storage.trigger_file));
        Self::new(config, media, triggers)
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let uploads = ServeDir::new(&state.config.storage.uploads_dir);
    let body_limit = DefaultBodyLimit::max(state.config.limits.max_upload_size);
    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route(&ws_path, get(ws_handler))
        .nest("/api/media", media::routes())
        .nest("/api/trigger", trigger::routes())
        .nest_service("/uploads", uploads)
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP/WebSocket server until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state.clone());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.hub.clone()))
    .await
    .context("Server error")?;

    info!("Beacon server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, after closing every live connection.
async fn shutdown_signal(hub: Hub) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    warn!("Received shutdown signal");
    let closed = hub.shutdown();
    info!(connections = closed, "Closed live connections");
}

/// Root handler.
async fn index_handler() -> &'static str {
    "Beacon is running"
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, remote))
}

fn record_outbound(message: Message) -> future::Ready<Result<Message, axum::Error>> {
    if let Message::Text(text) = &message {
        metrics::record_message(text.len(), "outbound");
    }
    future::ready(Ok(message))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, remote: Option<SocketAddr>) {
    let (sink, mut stream) = socket.split();
    let (transport, outbound) = WebSocketTransport::new(remote);
    tokio::spawn(write_loop(sink.with(record_outbound), outbound));

    let connection = match state.hub.handle_open(transport.clone()) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(remote = ?remote, error = %e, "Rejecting WebSocket connection");
            metrics::record_error("open");
            if let Err(e) = transport.close(close_code::TRY_AGAIN_LATER, &e.to_string()) {
                debug!(error = %e, "Failed to queue close frame");
            }
            return;
        }
    };
    let connection_id = connection.id().clone();
    drop(connection);

    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                metrics::record_message(text.len(), "inbound");
                state.hub.handle_message(&connection_id, &text);
            }
            Some(Ok(Message::Binary(data))) => {
                debug!(connection = %connection_id, bytes = data.len(), "Dropping binary frame");
                metrics::record_error("binary_frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Pongs are sent by the WebSocket layer.
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(connection = %connection_id, "Received close frame");
                break match frame {
                    Some(frame) => (frame.code, frame.reason.into_owned()),
                    None => (close_code::NO_STATUS, String::new()),
                };
            }
            Some(Err(e)) => {
                state.hub.handle_error(&connection_id, &e);
                metrics::record_error("websocket");
                break (close_code::ABNORMAL, e.to_string());
            }
            None => {
                debug!(connection = %connection_id, "WebSocket stream ended");
                break (close_code::ABNORMAL, String::new());
            }
        }
    };

    state.hub.handle_close(&connection_id, code, &reason);
    metrics::set_active_rooms(state.hub.stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::response::Response;
    use beacon_store::MemoryStore;
    use tempfile::TempDir;

    /// A router over in-memory stores and a temp uploads directory.
    pub(crate) fn test_app() -> (Router, Arc<AppState>, TempDir) {
        test_app_with(Config::default())
    }

    pub(crate) fn test_app_with(mut config: Config) -> (Router, Arc<AppState>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        config.storage.uploads_dir = dir.path().join("uploads");
        config.metrics.enabled = false;

        let state = Arc::new(AppState::new(
            config,
            Arc::new(MemoryStore::<MediaItem>::new()),
            Arc::new(MemoryStore::<Trigger>::new()),
        ));
        (build_router(state.clone()), state, dir)
    }

    pub(crate) async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}
