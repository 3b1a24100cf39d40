use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::proxy::config::GatewayConfig;
use crate::proxy::middleware::{auth_middleware, Authenticator};
use crate::proxy::session_manager::SessionManager;
use crate::proxy::upstream::ChatBackend;

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ChatBackend>,
    pub sessions: Arc<SessionManager>,
    pub authenticator: Arc<Authenticator>,
}

impl AppState {
    pub fn new(config: &GatewayConfig, backend: Arc<dyn ChatBackend>) -> Self {
        let sessions = SessionManager::new(
            backend.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout.max(1)),
        )
        .with_serialized_conversations(config.serialize_conversations);

        Self {
            backend,
            sessions: Arc::new(sessions),
            authenticator: Arc::new(Authenticator::new(&config.secret_key, &config.auth)),
        }
    }
}

/// Build the full route table
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    use crate::proxy::handlers;

    let protected = Router::new()
        .route("/gems", any(handlers::gems::handle_gems))
        .route("/gems/:gem_id", any(handlers::gems::handle_gem))
        .route("/chat", post(handlers::chat::handle_chat))
        .route("/chat/:gem_id", post(handlers::chat::handle_gem_chat))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root::handle_root))
        .merge(protected)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        host: String,
        config: &GatewayConfig,
        backend: Arc<dyn ChatBackend>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let state = AppState::new(config, backend);
        let app = build_router(state, config.max_body_bytes);

        // Bind address
        let addr = format!("{}:{}", host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        tracing::info!("Gateway server started at http://{}", addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling ended or error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Gateway server stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                shutdown_tx: Some(shutdown_tx),
            },
            handle,
        ))
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
