//! `HuddleServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::clock::run_clock;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_TOTAL;
use crate::registry::Registry;
use crate::session::{Session, SessionConfig};
use crate::shutdown::ShutdownCoordinator;
use crate::transport::WsTransport;

const CHAT_PAGE: &str = include_str!("../assets/chat.html");

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Participant registry.
    pub registry: Arc<Registry>,
    /// Session controller handed to each chat connection.
    pub session: Session,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The huddle server. Owns the registry for its whole lifetime.
pub struct HuddleServer {
    state: AppState,
}

impl HuddleServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let registry = Arc::new(Registry::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let session = Session::new(
            registry.clone(),
            shutdown.token(),
            SessionConfig::from(&config),
        );
        Self {
            state: AppState {
                registry,
                session,
                shutdown,
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/ws", get(chat_handler))
            .route("/clock", get(clock_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(%local_addr, "huddle server listening");
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Stop accepting, close every session and wait for them to unregister.
    pub async fn graceful_shutdown(&self) -> bool {
        let timeout = Duration::from_secs(self.state.config.shutdown_timeout_secs);
        self.state.shutdown.graceful_shutdown(timeout).await
    }

    /// Get the participant registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// Query parameters accepted on `/ws`.
#[derive(Debug, Deserialize)]
struct ChatParams {
    /// Display name; required and non-empty.
    name: Option<String>,
}

/// GET /
async fn index_handler() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

/// GET /ws?name=<identity>
async fn chat_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ChatParams>,
    State(state): State<AppState>,
) -> Response {
    counter!(WS_CONNECTIONS_TOTAL, "endpoint" => "chat").increment(1);
    let AppState {
        session,
        shutdown,
        config,
        ..
    } = state;
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track(async move {
                let _ = session.run(WsTransport::new(socket), params.name).await;
            })
        })
}

/// GET /clock
async fn clock_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    counter!(WS_CONNECTIONS_TOTAL, "endpoint" => "clock").increment(1);
    let interval = Duration::from_millis(state.config.clock_interval_ms);
    let token = state.shutdown.token();
    let shutdown = state.shutdown;
    ws.on_upgrade(move |socket| {
        shutdown.track(async move {
            let _ = run_clock(WsTransport::new(socket), interval, token).await;
        })
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> HuddleServer {
        HuddleServer::new(ServerConfig::default(), None)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn server_starts_with_empty_registry() {
        let server = make_server();
        assert!(server.registry().is_empty());
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.config().port, 8000);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let (status, body) = get_body(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["participants"], 0);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let (_, body) = get_body(server.router(), "/health").await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn index_serves_chat_page() {
        let server = make_server();
        let (status, body) = get_body(server.router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("/ws?name="));
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let server = make_server();
        let (status, _) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = HuddleServer::new(ServerConfig::default(), Some(handle));
        let (status, _) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let server = make_server();
        let (status, _) = get_body(server.router(), "/ws?name=alice").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let (status, _) = get_body(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_on_ephemeral_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = HuddleServer::new(config, None);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        assert!(server.graceful_shutdown().await);
        handle.await.unwrap();
    }
}
