use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use herald_settings::ServerSettings;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, HandlerState};
use crate::observer::{self, ObserverRegistry};
use crate::routes;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs.max(1)),
            client_timeout: Duration::from_secs(s.client_timeout_secs.max(1)),
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handlers: Arc<HandlerState>,
    pub observers: Arc<ObserverRegistry>,
    pub heartbeat_interval: Duration,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(routes::status))
        .route("/pairing", get(routes::pairing))
        .route("/connect", post(routes::connect))
        .route("/disconnect", post(routes::disconnect))
        .route("/send", post(routes::send))
        .route("/send-bulk", post(routes::send_bulk));

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to stop the server.
pub async fn start(
    config: ServerConfig,
    handlers: Arc<HandlerState>,
) -> Result<ServerHandle, std::io::Error> {
    let observers = Arc::new(ObserverRegistry::new());
    let shutdown = CancellationToken::new();

    let cleanup = observer::start_cleanup_task(
        Arc::clone(&observers),
        config.heartbeat_interval,
        config.client_timeout,
        shutdown.clone(),
    );

    let state = AppState {
        handlers,
        observers: Arc::clone(&observers),
        heartbeat_interval: config.heartbeat_interval,
    };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "herald server listening");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        observers,
        shutdown,
        server,
        cleanup,
    })
}

/// Handle returned by [`start`]; keeps the background tasks alive.
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    observers: Arc<ObserverRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.count()
    }

    /// Stop accepting connections and wait for in-flight requests. Open
    /// observer sockets are closed.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let ids: Vec<_> = self.observers.ids();
        for id in &ids {
            self.observers.unregister(id);
        }
        let _ = self.cleanup.await;
        let _ = self.server.await;
        tracing::info!(observers = ids.len(), "herald server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = Arc::clone(state.handlers.controller.hub());
    let subscription = hub.subscribe();
    tracing::info!(observer_id = %subscription.id, "observer connected");

    observer::handle_ws_connection(
        socket,
        subscription,
        hub,
        state.observers,
        state.handlers,
        state.heartbeat_interval,
    )
    .await;
}

/// `200` while the controller task is alive, `503` once it has stopped.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let code = if state.handlers.controller.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, axum::Json(handlers::health(&state.handlers)))
}
