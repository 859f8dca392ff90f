//! Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{Method, StatusCode};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{ClientRegistry, Dispatcher, RelayEvent, RelayStats, run_ws_session};

/// Body returned to plain HTTP requests that are not a WebSocket upgrade.
pub const PLAIN_HTTP_REPLY: &str = "hi!";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Open connections and their send queues.
    pub clients: Arc<ClientRegistry>,
    /// Inbound event queue feeding the dispatcher.
    pub events: mpsc::Sender<RelayEvent>,
    /// Relay counters published by the dispatcher.
    pub stats: Arc<RelayStats>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Per-message size cap applied on upgrade.
    pub max_message_size: usize,
    /// Server-wide shutdown signal.
    pub cancel: CancellationToken,
}

/// Build the Axum router with all routes.
///
/// `/health` and `/metrics` are fixed; every other path accepts a WebSocket
/// upgrade and answers plain `GET`s with [`PLAIN_HTTP_REPLY`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(upgrade_or_reply)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener, start the dispatcher and serve until shut down.
pub async fn start(
    config: ServerConfig,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = ShutdownCoordinator::new();
    let clients = Arc::new(ClientRegistry::new(config.max_send_queue));
    let stats = Arc::new(RelayStats::default());
    let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));

    let dispatcher = Dispatcher::new(Arc::clone(&clients), Arc::clone(&stats));
    shutdown.spawn(dispatcher.run(events_rx, shutdown.token()));

    let state = AppState {
        clients: Arc::clone(&clients),
        events: events_tx,
        stats,
        start_time: Instant::now(),
        metrics,
        max_message_size: config.max_message_size,
        cancel: shutdown.token(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "parley server listening");

    let app = router(state);
    let token = shutdown.token();
    shutdown.spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown,
        clients,
    })
}

/// Handle returned by [`start`]. Keeps the address and the shutdown switch.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    clients: Arc<ClientRegistry>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Open connections.
    pub fn connections(&self) -> usize {
        self.clients.count()
    }

    /// Stop accepting, close sessions and wait for the server tasks.
    pub async fn shutdown(self, timeout: Option<Duration>) -> bool {
        self.shutdown.graceful_shutdown(timeout).await
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.clients.count(),
        state.stats.parties(),
        state.stats.rooms(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Any other path: WebSocket upgrade, or a short plain-text reply to `GET`.
async fn upgrade_or_reply(
    State(state): State<AppState>,
    method: Method,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        if method == Method::GET || method == Method::HEAD {
            return PLAIN_HTTP_REPLY.into_response();
        }
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, state.clients, state.events, state.cancel)
        })
}
