//! HTTP handlers for the ssed server.
//!
//! Every request to the events path becomes one subscriber session; the
//! response body stays open until the client leaves or the server stops.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, State},
    http::{StatusCode, Version},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use ssed_core::Broker;
use ssed_transport::{sse, ConnectionHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared server state.
pub struct AppState {
    /// Admits and runs subscriber connections.
    pub handler: ConnectionHandler,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, broker: Broker, shutdown: CancellationToken) -> Self {
        let handler =
            ConnectionHandler::new(broker, config.handler_config()).with_shutdown(shutdown);
        Self { handler, config }
    }
}

/// Run the HTTP server until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, broker: Broker, shutdown: CancellationToken) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => {
                metrics::spawn_stats_reporter(broker.watch_stats());
            }
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("ssed listening on {}", addr);
    info!(
        "Event stream endpoint: http://{}{}",
        addr, config.transport.events_path
    );

    let state = Arc::new(AppState::new(config, broker, shutdown.clone()));
    serve(listener, state, shutdown).await
}

/// Build the router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.events_path, get(events_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve `app` on an already bound listener.
///
/// # Errors
///
/// Returns an error if accepting connections fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = app(state).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.handler.broker().stats().subscribers,
    }))
}

/// Event stream handler.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    version: Version,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let (sink, stream) = sse::channel(version, state.config.transport.buffer_size);
    let sink = match connect_info {
        Some(ConnectInfo(addr)) => sink.with_remote_addr(addr.to_string()),
        None => sink,
    };

    match state.handler.accept(sink) {
        Ok(session) => {
            tokio::spawn(async move {
                let _metrics_guard = ConnectionMetricsGuard::new();
                let result = session.run().await;
                metrics::record_session_end(&result);
            });
            stream.into_response()
        }
        Err(e) => {
            metrics::record_error(metrics::error_kind(&e));
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
