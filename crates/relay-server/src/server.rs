use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use relay_store::MessageStore;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::connections::{self, ConnectionRegistry, Heartbeat};
use crate::dispatcher::Dispatcher;
use crate::http;
use crate::presence::PresenceRegistry;
use crate::service::{MessageService, DEFAULT_STORE_TIMEOUT};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub request_timeout_secs: u64,
    pub store_timeout: Duration,
    pub heartbeat: Heartbeat,
    /// Allowed browser origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
    /// Directory served for paths no route matches.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_send_queue: 256,
            request_timeout_secs: 30,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            heartbeat: Heartbeat::default(),
            cors_origins: Vec::new(),
            static_dir: None,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(store: Arc<dyn MessageStore>, config: &ServerConfig) -> Self {
        let service = MessageService::with_timeout(store, config.store_timeout);
        let dispatcher = Dispatcher::new(
            Arc::new(PresenceRegistry::new()),
            Arc::new(ConnectionRegistry::new(config.max_send_queue)),
            Arc::new(service),
        );
        Self {
            dispatcher,
            heartbeat: config.heartbeat,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new()
        .route(
            "/api/messages",
            get(http::list_messages).post(http::create_message),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::put(http::update_message).delete(http::delete_message),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )));

    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health))
        .merge(api);

    if let Some(dir) = &config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router
        .with_state(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(store, &config);
    let router = build_router(state, &config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "chat relay started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests, up to
    /// `SHUTDOWN_GRACE`.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let abort = self.server.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.server).await.is_err() {
            tracing::warn!("graceful shutdown timed out, aborting");
            abort.abort();
        }
        tracing::info!("chat relay stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.dispatcher.connect();
    connections::handle_ws_connection(socket, connection_id, rx, state.dispatcher, state.heartbeat)
        .await;
}
