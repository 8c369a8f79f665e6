//! Bounded fan-out delivery of alerts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, Semaphore};

use super::ports::{AlertSource, DedupLedger, LedgerEntry, Notifier};
use super::wait_for_cancel;
use crate::error::AppError;
use crate::notification::{Alert, AlertRenderer};

/// Configuration options for a dispatch run.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Maximum number of deliveries in flight at once.
    pub max_in_flight: usize,
    /// Maximum number of alerts fetched per run.
    pub fetch_limit: usize,
    /// How far back the fetch looks.
    pub window: Duration,
    /// Ledger namespace that delivery records are stored under.
    pub ledger_namespace: String,
    /// Channel destination messages are sent to.
    pub destination: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 20,
            fetch_limit: 100,
            window: Duration::from_secs(3 * 60 * 60),
            ledger_namespace: "alert-notify".to_string(),
            destination: String::new(),
        }
    }
}

impl DispatchConfig {
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_ledger_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.ledger_namespace = namespace.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }
}

/// Errors that end a dispatch run.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The source query failed; nothing was delivered.
    #[error("failed to fetch alerts: {0}")]
    Fetch(#[source] AppError),

    /// The run stopped before every item finished. Carries the partial
    /// counts.
    #[error("dispatch run was cancelled")]
    Cancelled(RunReport),

    /// Another run holds the run guard.
    #[error("a dispatch run is already in progress")]
    Busy,
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Fetch(inner) => inner,
            DispatchError::Cancelled(_) => AppError::unavailable("dispatch run was cancelled"),
            DispatchError::Busy => AppError::conflict("a dispatch run is already in progress"),
        }
    }
}

/// Counts for a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub fetched: usize,
    /// Sent and recorded in the ledger.
    pub delivered: usize,
    /// Already in the ledger, not sent.
    pub duplicates: usize,
    pub send_failures: usize,
    /// Sent, but the ledger entry could not be written.
    pub ledger_failures: usize,
    /// Never launched because the run was cancelled.
    pub not_started: usize,
    /// Launched, then stopped by cancellation before the send finished.
    pub cancelled: usize,
}

impl RunReport {
    /// Number of messages that actually reached the channel.
    pub fn sent(&self) -> usize {
        self.delivered + self.ledger_failures
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Delivered => self.delivered += 1,
            ItemOutcome::Duplicate => self.duplicates += 1,
            ItemOutcome::SendFailed => self.send_failures += 1,
            ItemOutcome::Unrecorded => self.ledger_failures += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ItemOutcome {
    Delivered,
    Duplicate,
    SendFailed,
    Unrecorded,
    Cancelled,
}

/// What each delivery task needs, shared across the tasks of one run.
struct Delivery {
    notifier: Arc<dyn Notifier>,
    ledger: Arc<dyn DedupLedger>,
    renderer: AlertRenderer,
    namespace: String,
    destination: String,
}

/// Fetches recent alerts and delivers each one at most once.
///
/// Per-item failures are logged and counted but never end the run. Only a
/// failed fetch or cancellation does.
pub struct DispatchWorker {
    source: Arc<dyn AlertSource>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<dyn DedupLedger>,
    renderer: AlertRenderer,
    config: DispatchConfig,
    /// Limits concurrent deliveries.
    semaphore: Arc<Semaphore>,
    /// Held for the duration of a guarded run, including by every delivery
    /// task the run spawned.
    run_guard: Arc<Mutex<()>>,
}

impl DispatchWorker {
    pub fn new(
        source: Arc<dyn AlertSource>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<dyn DedupLedger>,
        config: DispatchConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            source,
            notifier,
            ledger,
            renderer: AlertRenderer::default(),
            config,
            semaphore,
            run_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_renderer(mut self, renderer: AlertRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// True while a guarded run is in progress.
    pub fn is_busy(&self) -> bool {
        self.run_guard.try_lock().is_err()
    }

    /// Runs unless another guarded run is in progress, in which case it
    /// returns [`DispatchError::Busy`] immediately.
    ///
    /// The guard stays held until the last spawned delivery task finishes,
    /// even when the returned future is dropped early.
    pub async fn try_run(&self, cancel: watch::Receiver<bool>) -> Result<RunReport, DispatchError> {
        let guard = Arc::clone(&self.run_guard)
            .try_lock_owned()
            .map_err(|_| DispatchError::Busy)?;
        self.execute(cancel, Some(Arc::new(guard))).await
    }

    /// Executes one run: fetch, fan out, join.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<RunReport, DispatchError> {
        self.execute(cancel, None).await
    }

    async fn execute(
        &self,
        mut cancel: watch::Receiver<bool>,
        guard: Option<Arc<OwnedMutexGuard<()>>>,
    ) -> Result<RunReport, DispatchError> {
        if *cancel.borrow() {
            return Err(DispatchError::Cancelled(RunReport::default()));
        }
        let started = Instant::now();

        let fetched = tokio::select! {
            biased;
            _ = wait_for_cancel(&mut cancel) => return Err(DispatchError::Cancelled(RunReport::default())),
            result = self.source.query_recent(self.config.window, self.config.fetch_limit) => result,
        };
        let alerts = fetched.map_err(|err| {
            tracing::error!(
                source = self.source.name(),
                error = %err,
                retryable = err.is_retryable(),
                "failed to fetch alerts"
            );
            DispatchError::Fetch(err)
        })?;

        let mut report = RunReport {
            fetched: alerts.len(),
            ..RunReport::default()
        };
        tracing::debug!(count = alerts.len(), source = self.source.name(), "fetched alerts");

        let delivery = Arc::new(Delivery {
            notifier: Arc::clone(&self.notifier),
            ledger: Arc::clone(&self.ledger),
            renderer: self.renderer.clone(),
            namespace: self.config.ledger_namespace.clone(),
            destination: self.config.destination.clone(),
        });

        let mut handles = Vec::with_capacity(alerts.len());
        let mut pending = alerts.into_iter();
        for alert in pending.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = wait_for_cancel(&mut cancel) => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                report.not_started += 1;
                break;
            };

            let delivery = Arc::clone(&delivery);
            let mut item_cancel = cancel.clone();
            let run_guard = guard.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let _run_guard = run_guard;
                deliver(&delivery, alert, &mut item_cancel).await
            }));
        }
        report.not_started += pending.len();

        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    tracing::error!(error = %err, "delivery task failed");
                    report.send_failures += 1;
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if report.not_started > 0 || report.cancelled > 0 {
            tracing::warn!(
                not_started = report.not_started,
                cancelled = report.cancelled,
                delivered = report.delivered,
                elapsed_ms,
                "dispatch run cancelled"
            );
            return Err(DispatchError::Cancelled(report));
        }

        tracing::info!(
            fetched = report.fetched,
            delivered = report.delivered,
            duplicates = report.duplicates,
            send_failures = report.send_failures,
            ledger_failures = report.ledger_failures,
            elapsed_ms,
            "dispatch run finished"
        );
        Ok(report)
    }
}

/// Delivers one alert. Every failure is logged here and turned into an
/// outcome.
async fn deliver(
    delivery: &Delivery,
    alert: Alert,
    cancel: &mut watch::Receiver<bool>,
) -> ItemOutcome {
    let key = alert.trx_id.clone();

    let seen = tokio::select! {
        biased;
        _ = wait_for_cancel(cancel) => return ItemOutcome::Cancelled,
        seen = delivery.ledger.exists(&delivery.namespace, &key) => seen,
    };
    match seen {
        Ok(true) => {
            tracing::debug!(trx_id = %key, "alert already delivered");
            return ItemOutcome::Duplicate;
        }
        Ok(false) => {}
        Err(err) => tracing::warn!(
            trx_id = %key,
            error = %err,
            retryable = err.is_retryable(),
            "dedup check failed, delivering anyway"
        ),
    }

    tracing::info!(
        service = %alert.service_name,
        status = %alert.status,
        rule = %alert.rule_name,
        "new alert"
    );

    let text = delivery.renderer.render(&alert);
    let sent = tokio::select! {
        biased;
        _ = wait_for_cancel(cancel) => return ItemOutcome::Cancelled,
        sent = delivery.notifier.send(&delivery.destination, &text) => sent,
    };
    if let Err(err) = sent {
        tracing::warn!(
            trx_id = %key,
            notifier = delivery.notifier.name(),
            error = %err,
            retryable = err.is_retryable(),
            "failed to send alert"
        );
        return ItemOutcome::SendFailed;
    }

    let entry = LedgerEntry::new(alert, Utc::now());
    match delivery.ledger.put(&delivery.namespace, &key, &entry).await {
        Ok(()) => ItemOutcome::Delivered,
        Err(err) => {
            tracing::warn!(
                trx_id = %key,
                error = %err,
                retryable = err.is_retryable(),
                "alert sent but ledger entry not recorded"
            );
            ItemOutcome::Unrecorded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dispatch_config_default() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_in_flight, 20);
        assert_eq!(config.fetch_limit, 100);
        assert_eq!(config.window, Duration::from_secs(10_800));
        assert_eq!(config.ledger_namespace, "alert-notify");
    }

    #[test]
    fn test_dispatch_config_builder() {
        let config = DispatchConfig::default()
            .with_max_in_flight(4)
            .with_fetch_limit(10)
            .with_window(Duration::from_secs(60))
            .with_ledger_namespace("notify")
            .with_destination("-100200");
        assert_eq!(config.max_in_flight, 4);
        assert_eq!(config.fetch_limit, 10);
        assert_eq!(config.window, Duration::from_secs(60));
        assert_eq!(config.ledger_namespace, "notify");
        assert_eq!(config.destination, "-100200");
    }

    #[test]
    fn test_dispatch_error_into_app_error() {
        let busy: AppError = DispatchError::Busy.into();
        assert_eq!(busy.kind(), ErrorKind::Conflict);
        assert_eq!(busy.kind().status().as_u16(), 409);

        let cancelled: AppError = DispatchError::Cancelled(RunReport::default()).into();
        assert_eq!(cancelled.kind(), ErrorKind::Unavailable);
        assert!(!cancelled.is_retryable());

        let fetch: AppError = DispatchError::Fetch(AppError::bad_request("bad query")).into();
        assert_eq!(fetch.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_run_report_record() {
        let mut report = RunReport::default();
        report.record(ItemOutcome::Delivered);
        report.record(ItemOutcome::Delivered);
        report.record(ItemOutcome::Unrecorded);
        report.record(ItemOutcome::Duplicate);
        report.record(ItemOutcome::SendFailed);
        report.record(ItemOutcome::Cancelled);

        assert_eq!(report.delivered, 2);
        assert_eq!(report.ledger_failures, 1);
        assert_eq!(report.sent(), 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.send_failures, 1);
        assert_eq!(report.cancelled, 1);
    }
}
