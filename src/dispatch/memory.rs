//! In-memory capabilities for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::ports::{AlertSource, DedupLedger, LedgerEntry, Notifier};
use crate::error::AppError;
use crate::notification::Alert;

/// Serves a fixed list of alerts, or a configured failure.
#[derive(Default)]
pub struct StaticSource {
    alerts: RwLock<Vec<Alert>>,
    failure: RwLock<Option<String>>,
    queries: AtomicUsize,
}

impl StaticSource {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: RwLock::new(alerts),
            ..Self::default()
        }
    }

    pub async fn set_alerts(&self, alerts: Vec<Alert>) {
        *self.alerts.write().await = alerts;
    }

    /// Makes every following query fail with an `Internal` error.
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write().await = Some(message.into());
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn query_recent(&self, _window: Duration, limit: usize) -> Result<Vec<Alert>, AppError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failure.read().await.as_ref() {
            return Err(AppError::internal(message.clone()));
        }
        Ok(self.alerts.read().await.iter().take(limit).cloned().collect())
    }
}

type FailWhen = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Records every message instead of sending it.
///
/// Can be told to fail some sends and to take a fixed time per send. It also
/// tracks the highest number of sends in flight at once.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<(String, String)>>,
    fail_when: Option<FailWhen>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails any send whose text satisfies `predicate`.
    pub fn failing_when(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Makes every send take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(destination, text)` pairs of successful sends.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    /// Sends started, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_when.as_ref().is_some_and(|fail| fail(text)) {
            return Err(AppError::internal("send rejected"));
        }

        tracing::info!(destination, "recorded message:{}", text);
        self.sent
            .write()
            .await
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

/// Decrements the in-flight counter when a send finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Ledger kept in process memory, keyed by namespace then key.
#[derive(Default)]
pub struct MemoryLedger {
    entries: RwLock<HashMap<String, HashMap<String, LedgerEntry>>>,
    unavailable: RwLock<Option<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following operation fail with an `Unavailable` error.
    pub async fn set_unavailable(&self, reason: Option<String>) {
        *self.unavailable.write().await = reason;
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, namespace: &str, key: &str) -> Option<LedgerEntry> {
        self.entries
            .read()
            .await
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .cloned()
    }

    async fn check_available(&self) -> Result<(), AppError> {
        match self.unavailable.read().await.as_ref() {
            Some(reason) => Err(AppError::unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, AppError> {
        self.check_available().await?;
        Ok(self
            .entries
            .read()
            .await
            .get(namespace)
            .is_some_and(|keys| keys.contains_key(key)))
    }

    async fn put(&self, namespace: &str, key: &str, entry: &LedgerEntry) -> Result<(), AppError> {
        self.check_available().await?;
        self.entries
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::notification::AlertFields;
    use chrono::Utc;

    fn alert(id: &str) -> Alert {
        Alert::new(
            id,
            AlertFields {
                status: "active".to_string(),
                timestamp: Utc::now(),
                ..AlertFields::default()
            },
        )
    }

    #[tokio::test]
    async fn test_static_source_limit_and_failure() {
        let source = StaticSource::new(vec![alert("a"), alert("b"), alert("c")]);
        let alerts = source.query_recent(Duration::from_secs(60), 2).await.unwrap();
        assert_eq!(alerts.len(), 2);

        source.fail_with("index missing").await;
        let err = source
            .query_recent(Duration::from_secs(60), 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_ledger_namespaces() {
        let ledger = MemoryLedger::new();
        let entry = LedgerEntry::new(alert("a"), Utc::now());

        assert!(!ledger.exists("notify", &entry.key).await.unwrap());
        ledger.put("notify", &entry.key, &entry).await.unwrap();
        assert!(ledger.exists("notify", &entry.key).await.unwrap());
        assert!(!ledger.exists("other", &entry.key).await.unwrap());
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.get("notify", &entry.key).await, Some(entry));
    }

    #[tokio::test]
    async fn test_memory_ledger_unavailable() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(Some("down".to_string())).await;
        let err = ledger.exists("notify", "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        ledger.set_unavailable(None).await;
        assert!(!ledger.exists("notify", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_recording_notifier_failures() {
        let notifier = RecordingNotifier::new().failing_when(|text| text.contains("bad"));
        notifier.send("chat", "good").await.unwrap();
        assert!(notifier.send("chat", "bad").await.is_err());

        assert_eq!(notifier.attempts(), 2);
        assert_eq!(
            notifier.sent().await,
            vec![("chat".to_string(), "good".to_string())]
        );
        assert_eq!(notifier.peak_in_flight(), 1);
    }
}
