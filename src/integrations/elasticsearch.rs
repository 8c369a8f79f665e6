//! Elasticsearch adapter
//!
//! Reads alerts from the observability alerts index and keeps the delivery
//! ledger in daily `{namespace}-YYYY-MM-DD` indices. Failures are reported as
//! [`StoreFault`]s, classified, and wrapped into [`AppError`]s.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatch::{AlertSource, DedupLedger, LedgerEntry};
use crate::error::{AppError, ErrorKind, StoreFault, TransientFaultClassifier};
use crate::notification::{Alert, AlertFields};

/// Index pattern Kibana writes APM alerts to.
pub const DEFAULT_ALERTS_INDEX: &str = ".internal.alerts-observability.apm.alerts-*";

/// Source fields read from each alert document.
const SOURCE_FIELDS: [&str; 7] = [
    "service.name",
    "service.environment",
    "kibana.alert.rule.category",
    "kibana.alert.rule.name",
    "kibana.alert.reason",
    "kibana.alert.status",
    "@timestamp",
];

/// Longest error body kept in a fault message.
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticConfig {
    /// Node URLs; requests rotate through them.
    pub hosts: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub alerts_index: String,
    pub timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:9200".to_string()],
            username: None,
            password: None,
            alerts_index: DEFAULT_ALERTS_INDEX.to_string(),
            timeout_secs: 10,
        }
    }
}

impl ElasticConfig {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_alerts_index(mut self, index: impl Into<String>) -> Self {
        self.alerts_index = index.into();
        self
    }
}

/// Client for the alert source and the ledger.
pub struct ElasticClient {
    client: Client,
    config: ElasticConfig,
    classifier: TransientFaultClassifier,
    next_host: AtomicUsize,
}

impl ElasticClient {
    pub fn new(config: ElasticConfig, classifier: TransientFaultClassifier) -> Result<Self, AppError> {
        if config.hosts.iter().all(|host| host.trim().is_empty()) {
            return Err(AppError::bad_request("no elasticsearch hosts configured"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                AppError::internal("failed to create elasticsearch client").with_cause(e)
            })?;

        Ok(Self {
            client,
            config,
            classifier,
            next_host: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &ElasticConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        let hosts: Vec<&str> = self
            .config
            .hosts
            .iter()
            .map(|host| host.trim())
            .filter(|host| !host.is_empty())
            .collect();
        let index = self.next_host.fetch_add(1, Ordering::Relaxed) % hosts.len().max(1);
        let host = hosts.get(index).copied().unwrap_or_default();
        format!("{}/{}", host.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, StoreFault> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request.send().await.map_err(fault_from_transport)?;
        let status = response.status();
        let text = response.text().await.map_err(fault_from_transport)?;

        if !status.is_success() {
            return Err(fault_from_response(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| StoreFault::Other(format!("invalid response body: {}", e)))
    }

    fn to_app_error(&self, message: &str, fault: StoreFault) -> AppError {
        self.classifier.to_app_error(ErrorKind::Internal, message, fault)
    }
}

#[async_trait]
impl AlertSource for ElasticClient {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn query_recent(&self, window: Duration, limit: usize) -> Result<Vec<Alert>, AppError> {
        let path = format!("{}/_search", self.config.alerts_index);
        let body = self
            .post_json(&path, &search_body(window, limit))
            .await
            .map_err(|fault| self.to_app_error("failed to query alerts", fault))?;
        parse_alerts(&body).map_err(|fault| self.to_app_error("failed to read alerts", fault))
    }
}

#[async_trait]
impl DedupLedger for ElasticClient {
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, AppError> {
        let path = format!("{}-*/_count?ignore_unavailable=true", namespace);
        let body = self
            .post_json(&path, &json!({ "query": { "term": { "trx_id": key } } }))
            .await
            .map_err(|fault| self.to_app_error("failed to check delivery ledger", fault))?;

        let count = body
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                self.to_app_error(
                    "failed to check delivery ledger",
                    StoreFault::Other("count missing from response".to_string()),
                )
            })?;
        Ok(count > 0)
    }

    async fn put(&self, namespace: &str, key: &str, entry: &LedgerEntry) -> Result<(), AppError> {
        let path = format!("{}/_doc", ledger_index(namespace, entry.recorded_at));
        let document = ledger_document(key, entry).map_err(|e| {
            AppError::internal("failed to encode ledger entry").with_cause(e)
        })?;
        self.post_json(&path, &document)
            .await
            .map_err(|fault| self.to_app_error("failed to record delivery", fault))?;
        Ok(())
    }
}

/// Daily ledger index for an entry recorded at `recorded_at`.
pub fn ledger_index(namespace: &str, recorded_at: DateTime<Utc>) -> String {
    format!("{}-{}", namespace, recorded_at.format("%Y-%m-%d"))
}

/// The stored document: the alert's fields plus `recorded_at`, with `trx_id`
/// set to the ledger key.
fn ledger_document(key: &str, entry: &LedgerEntry) -> Result<Value, serde_json::Error> {
    let mut document = serde_json::to_value(&entry.alert)?;
    if let Value::Object(fields) = &mut document {
        fields.insert("trx_id".to_string(), Value::String(key.to_string()));
        fields.insert("recorded_at".to_string(), serde_json::to_value(entry.recorded_at)?);
    }
    Ok(document)
}

fn search_body(window: Duration, limit: usize) -> Value {
    json!({
        "_source": SOURCE_FIELDS,
        "size": limit,
        "track_total_hits": false,
        "sort": [{ "@timestamp": { "order": "desc" } }],
        "query": {
            "range": {
                "@timestamp": { "gte": format!("now-{}s", window.as_secs()) }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
}

fn parse_alerts(body: &Value) -> Result<Vec<Alert>, StoreFault> {
    let response = SearchResponse::deserialize(body)
        .map_err(|e| StoreFault::Other(format!("unexpected search response: {}", e)))?;

    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| Alert::new(hit.id, alert_fields(&hit.source)))
        .collect())
}

fn alert_fields(source: &Value) -> AlertFields {
    let text = |path: &str| {
        source_field(source, path)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let timestamp = source_field(source, "@timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_default();

    AlertFields {
        service_name: text("service.name"),
        environment: text("service.environment"),
        category: text("kibana.alert.rule.category"),
        rule_name: text("kibana.alert.rule.name"),
        message: text("kibana.alert.reason"),
        status: text("kibana.alert.status"),
        timestamp,
    }
}

/// Looks up a dotted field, either stored flat (`"service.name": ..`) or as
/// nested objects (`"service": {"name": ..}`).
fn source_field<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(path) {
        return Some(value);
    }
    let (head, rest) = path.split_once('.')?;
    source_field(source.get(head)?, rest)
}

fn fault_from_transport(err: reqwest::Error) -> StoreFault {
    let timed_out = err.is_timeout();
    let message = err.without_url().to_string();
    if timed_out {
        StoreFault::Timeout(message)
    } else {
        StoreFault::Network(message)
    }
}

/// Maps an error response to a command fault carrying the HTTP status as its
/// code and the Elasticsearch error type as its name.
fn fault_from_response(status: u16, body: &str) -> StoreFault {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|value| value.get("error"));

    let name = error
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .map(String::from);
    let message = error
        .and_then(|e| e.get("reason").or(Some(e)))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect());

    StoreFault::Command {
        code: i32::from(status),
        name,
        message,
    }
}
