//! Capabilities the dispatch worker depends on.
//!
//! Each capability is a trait object so the worker can run against the
//! Elasticsearch and Telegram adapters in production and the in-memory ones in
//! tests. Implementations report failures as [`AppError`], already classified.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::notification::Alert;

/// Where candidate alerts come from.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Returns at most `limit` alerts raised within the last `window`.
    async fn query_recent(&self, window: Duration, limit: usize) -> Result<Vec<Alert>, AppError>;
}

/// Delivers rendered messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, destination: &str, text: &str) -> Result<(), AppError>;
}

/// Record of deliveries that have already happened.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// True if any entry with `key` was recorded under `namespace`.
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, AppError>;

    async fn put(&self, namespace: &str, key: &str, entry: &LedgerEntry) -> Result<(), AppError>;
}

/// One recorded delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key: String,
    pub recorded_at: DateTime<Utc>,
    pub alert: Alert,
}

impl LedgerEntry {
    pub fn new(alert: Alert, recorded_at: DateTime<Utc>) -> Self {
        Self {
            key: alert.trx_id.clone(),
            recorded_at,
            alert,
        }
    }
}
