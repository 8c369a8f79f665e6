//! HTTP surface
//!
//! A small axum router for health checks and manual dispatch runs. Replies
//! use the [`ApiResponse`] envelope.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::dispatch::DispatchWorker;
use crate::error::{AppError, ErrorKind};
use crate::response::{respond, ApiResponse};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve HTTP alongside the scheduler in `run` mode
    pub enabled: bool,
    /// Address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            enabled: true,
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Get the full bind address (ip:port)
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub worker: Arc<DispatchWorker>,
    /// Manual runs observe the process shutdown signal.
    pub shutdown: watch::Receiver<bool>,
}

impl ApiState {
    pub fn new(worker: Arc<DispatchWorker>, shutdown: watch::Receiver<bool>) -> Self {
        Self { worker, shutdown }
    }
}

/// Health check payload
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub dispatch_running: bool,
}

/// Create the router with all routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler).fallback(method_not_allowed))
        .route("/dispatch", post(dispatch_handler).fallback(method_not_allowed))
        .fallback(path_not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health_handler(State(state): State<ApiState>) -> Response {
    ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dispatch_running: state.worker.is_busy(),
    })
    .into_response()
}

/// POST /dispatch
///
/// Runs one dispatch pass through the worker's run guard. A pass already in
/// progress, scheduled or manual, yields `DATA_CONFLICT`.
///
/// The pass runs on its own task, so a client that disconnects does not cut
/// it short.
pub async fn dispatch_handler(State(state): State<ApiState>) -> Response {
    tracing::info!("manual dispatch requested");
    let worker = Arc::clone(&state.worker);
    let shutdown = state.shutdown.clone();
    let result = match tokio::spawn(async move { worker.try_run(shutdown).await }).await {
        Ok(result) => result.map_err(AppError::from),
        Err(err) => Err(AppError::internal("manual dispatch task failed").with_cause(err)),
    };
    respond(result)
}

async fn path_not_found() -> AppError {
    AppError::new(ErrorKind::PathNotFound, "path not found", None)
}

async fn method_not_allowed() -> AppError {
    AppError::new(ErrorKind::MethodNotFound, "method not allowed", None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, MemoryLedger, RecordingNotifier, RunReport, StaticSource};
    use crate::notification::{Alert, AlertFields, STATUS_ACTIVE};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn alert(id: &str) -> Alert {
        Alert::new(
            id,
            AlertFields {
                service_name: "checkout".to_string(),
                rule_name: "latency".to_string(),
                status: STATUS_ACTIVE.to_string(),
                ..AlertFields::default()
            },
        )
    }

    fn create_test_state(notifier: RecordingNotifier) -> (ApiState, watch::Sender<bool>) {
        let worker = DispatchWorker::new(
            Arc::new(StaticSource::new(vec![alert("a-1"), alert("a-2")])),
            Arc::new(notifier),
            MemoryLedger::shared(),
            DispatchConfig::default().with_destination("-100"),
        );
        let (tx, rx) = watch::channel(false);
        (ApiState::new(Arc::new(worker), rx), tx)
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.port, 8080);
        assert_eq!(config.socket_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new(9000).with_bind_address("0.0.0.0");
        assert!(config.enabled);
        assert_eq!(config.socket_addr(), "0.0.0.0:9000");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _tx) = create_test_state(RecordingNotifier::new());
        let response = create_router(state)
            .oneshot(request("GET", "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["code"], "SUCCESS");
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["service"], "alertwire");
        assert_eq!(json["data"]["dispatch_running"], false);
    }

    #[tokio::test]
    async fn test_dispatch_endpoint() {
        let (state, _tx) = create_test_state(RecordingNotifier::new());
        let response = create_router(state)
            .oneshot(request("POST", "/dispatch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let report: RunReport = serde_json::from_value(json["data"].clone()).unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn test_dispatch_while_running_conflicts() {
        let (state, _tx) =
            create_test_state(RecordingNotifier::new().with_delay(Duration::from_millis(300)));

        let worker = Arc::clone(&state.worker);
        let shutdown = state.shutdown.clone();
        let background = tokio::spawn(async move { worker.try_run(shutdown).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = create_router(state)
            .oneshot(request("POST", "/dispatch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "DATA_CONFLICT");

        assert!(background.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_is_unavailable() {
        let (state, tx) = create_test_state(RecordingNotifier::new());
        tx.send(true).unwrap();

        let response = create_router(state)
            .oneshot(request("POST", "/dispatch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (state, _tx) = create_test_state(RecordingNotifier::new());
        let response = create_router(state)
            .oneshot(request("GET", "/alerts"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "PATH_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (state, _tx) = create_test_state(RecordingNotifier::new());
        let response = create_router(state)
            .oneshot(request("GET", "/dispatch"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let json = body_json(response).await;
        assert_eq!(json["code"], "METHOD_NOT_FOUND");
    }
}
