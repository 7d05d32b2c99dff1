//! `RelayServer`: Axum HTTP, WebSocket and SSE server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{ConnectionId, RelayError};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::connection::{ClientConnection, ConnectionKind, EventFraming};
use crate::generator::{EventSource, SensorGenerator};
use crate::health::{self, HealthResponse};
use crate::hub::BroadcastHub;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::sse;
use crate::stream::{SessionState, StreamSessionManager};
use crate::websocket::session::run_broadcast_session;
use crate::websocket::stream_ws::run_stream_socket;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections of every kind.
    pub registry: Arc<ConnectionRegistry>,
    /// Chat fan-out.
    pub hub: Arc<BroadcastHub>,
    /// Stream sessions.
    pub streams: Arc<StreamSessionManager>,
    /// Shutdown coordinator; connection handlers refuse once it fires.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<BroadcastHub>,
    streams: Arc<StreamSessionManager>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server producing sensor readings paced per `config`.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let source = SensorGenerator::new(
            Duration::from_millis(config.min_interval_ms),
            Duration::from_millis(config.max_interval_ms),
        );
        Self::with_source(config, Arc::new(source), metrics)
    }

    /// Create a server with a custom event source.
    fn with_source(
        config: ServerConfig,
        source: Arc<dyn EventSource>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&registry)));
        let streams = Arc::new(StreamSessionManager::new(
            Arc::clone(&registry),
            source,
            config.failure_threshold,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&streams),
        ));
        Self {
            config: Arc::new(config),
            registry,
            hub,
            streams,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            hub: Arc::clone(&self.hub),
            streams: Arc::clone(&self.streams),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(index_handler))
            .route("/health", get(health_handler))
            .route("/sse-health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route("/stream-ws", get(stream_ws_handler))
            .route("/sse-stream", get(sse::sse_stream))
            .route("/sse-stream/{id}/start", post(start_stream_handler))
            .route("/sse-stream/{id}/stop", post(stop_stream_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task until shutdown is signalled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.listener_token();

        info!(%addr, "relay server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server terminated with error");
            }
        });
        Ok((addr, handle))
    }

    /// Stop every stream session (each client receives `close`), close
    /// every connection, and release the listener.
    pub fn initiate_shutdown(&self) -> ShutdownReport {
        self.shutdown.initiate()
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast hub.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Get the stream session manager.
    pub fn streams(&self) -> &Arc<StreamSessionManager> {
        &self.streams
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Body of the stream control endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    /// Addressed connection.
    pub connection_id: ConnectionId,
    /// Session state after the action.
    pub state: SessionState,
}

/// Map a [`RelayError`] onto an HTTP error response.
pub(crate) fn error_response(err: &RelayError) -> Response {
    let status = match err {
        RelayError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::NotStreamConnection(_)
        | RelayError::NotBroadcastConnection(_)
        | RelayError::Duplicate(_) => StatusCode::CONFLICT,
        RelayError::ConnectionLimitExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::MalformedInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": err.to_string(),
        "category": err.category(),
    });
    (status, Json(body)).into_response()
}

/// GET /
async fn index_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "broadcast": "GET /ws",
            "stream": "GET /sse-stream",
            "streamSocket": "GET /stream-ws",
            "startStream": "POST /sse-stream/{id}/start",
            "stopStream": "POST /sse-stream/{id}/stop",
            "health": "GET /health",
            "sseHealth": "GET /sse-health",
            "metrics": "GET /metrics",
        },
    }))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.registry,
        state.streams.active_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// 503 for connection attempts that arrive during shutdown.
pub(crate) fn shutting_down_response() -> Response {
    let body = json!({
        "error": "server is shutting down",
        "category": "shutting_down",
    });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return shutting_down_response();
    }
    let (connection, rx) =
        ClientConnection::with_channel(ConnectionKind::Broadcast, state.config.channel_capacity);
    let ping = state.config.ping_interval();
    ws.on_upgrade(move |socket| run_broadcast_session(socket, connection, rx, state.hub, ping))
        .into_response()
}

/// GET /stream-ws
async fn stream_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return shutting_down_response();
    }
    let (connection, rx) = ClientConnection::with_channel(
        ConnectionKind::Stream(EventFraming::Json),
        state.config.channel_capacity,
    );
    let ping = state.config.ping_interval();
    ws.on_upgrade(move |socket| {
        run_stream_socket(socket, connection, rx, state.registry, state.streams, ping)
    })
    .into_response()
}

/// POST /sse-stream/{id}/start
async fn start_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = ConnectionId::from(id);
    match state.streams.start(&id) {
        Ok(session) => Json(ControlResponse {
            connection_id: id,
            state: session,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /sse-stream/{id}/stop
async fn stop_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = ConnectionId::from(id);
    match state.streams.stop(&id) {
        Ok(session) => Json(ControlResponse {
            connection_id: id,
            state: session,
        })
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(ServerConfig::default(), None)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.registry().count(), 0);
        assert_eq!(server.streams().active_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["active_connections"], 0);
        assert_eq!(parsed["active_sessions"], 0);
        assert!(parsed["connection_details"].is_array());
    }

    #[tokio::test]
    async fn index_lists_endpoints() {
        let app = make_server().router();
        let resp = app.oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["endpoints"]["broadcast"], "GET /ws");
    }

    #[tokio::test]
    async fn metrics_without_recorder_unavailable() {
        let app = make_server().router();
        let resp = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_with_handle() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let app = RelayServer::new(ServerConfig::default(), Some(handle)).router();
        let resp = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn control_unknown_connection_is_404() {
        let app = make_server().router();
        let resp = app.oneshot(post("/sse-stream/missing/start")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let parsed = body_json(resp).await;
        assert!(parsed["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn control_broadcast_connection_is_409() {
        let server = make_server();
        let (conn, _rx) = ClientConnection::with_channel(ConnectionKind::Broadcast, 4);
        let id = server.registry().register(conn).unwrap();

        let resp = server
            .router()
            .oneshot(post(&format!("/sse-stream/{id}/stop")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn control_start_and_stop() {
        let server = make_server();
        let (conn, _rx) =
            ClientConnection::with_channel(ConnectionKind::Stream(EventFraming::Sse), 16);
        let id = server.registry().register(conn).unwrap();

        let resp = server
            .router()
            .oneshot(post(&format!("/sse-stream/{id}/start")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["connectionId"], id.as_str());
        assert_eq!(parsed["state"], "running");

        let resp = server
            .router()
            .oneshot(post(&format!("/sse-stream/{id}/stop")))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["state"], "idle");
    }

    #[tokio::test]
    async fn sse_over_limit_is_503() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        let app = RelayServer::new(config, None).router();
        let resp = app.oneshot(get("/sse-stream")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn sse_response_has_stream_headers() {
        let server = make_server();
        let resp = server.router().oneshot(get("/sse-stream")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert!(resp.headers().contains_key(sse::CONNECTION_ID_HEADER));
        assert_eq!(server.registry().count(), 1);
        assert_eq!(server.streams().active_count(), 1);

        drop(resp);
        assert_eq!(server.registry().count(), 0);
        assert_eq!(server.streams().active_count(), 0);
    }

    #[tokio::test]
    async fn sse_health_alias_matches_health() {
        let app = make_server().router();
        let resp = app.oneshot(get("/sse-health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["max_connections"], 1000);
    }

    #[tokio::test]
    async fn sse_refused_during_shutdown() {
        let server = make_server();
        let _ = server.initiate_shutdown();
        let resp = server.router().oneshot(get("/sse-stream")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["category"], "shutting_down");
        assert_eq!(server.registry().count(), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let resp = app.oneshot(get("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn initiate_shutdown_stops_sessions_and_closes_connections() {
        let server = make_server();
        let (conn, mut rx) =
            ClientConnection::with_channel(ConnectionKind::Stream(EventFraming::Sse), 16);
        let id = server.registry().register(Arc::clone(&conn)).unwrap();
        let _ = server.streams().start(&id).unwrap();

        let report = server.initiate_shutdown();
        assert_eq!(report.stopped_sessions, 1);
        assert_eq!(report.closed_connections, 1);
        assert!(server.shutdown().is_shutting_down());
        assert!(conn.is_closed());
        assert_eq!(server.streams().active_count(), 0);

        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            last = Some(frame);
        }
        assert!(last.unwrap().starts_with("event: close\n"));
    }
}
