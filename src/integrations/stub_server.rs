//! Local HTTP server that records requests and answers each one with a fixed
//! reply. Used to exercise the adapters' request and response handling.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::Router;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// A request as the server received it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path plus query string.
    pub path: String,
    pub authorization: Option<String>,
    /// Parsed JSON body, `Null` when absent or not JSON.
    pub body: Value,
}

pub struct StubServer {
    pub base_url: String,
    status: StatusCode,
    reply: String,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubServer {
    /// Binds an ephemeral port on loopback and starts serving.
    pub async fn start(status: StatusCode, reply: impl Into<String>) -> Arc<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stub = Arc::new(Self {
            base_url: format!("http://{}", addr),
            status,
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .fallback(record)
            .with_state(Arc::clone(&stub));
        tokio::spawn(async move { axum::serve(listener, app).await });
        stub
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }
}

async fn record(
    State(stub): State<Arc<StubServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, [(HeaderName, &'static str); 1], String) {
    let request = RecordedRequest {
        method,
        path: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    stub.requests.lock().await.push(request);

    (
        stub.status,
        [(header::CONTENT_TYPE, "application/json")],
        stub.reply.clone(),
    )
}
