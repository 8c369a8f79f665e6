//! Recurring dispatch job.
//!
//! Runs are started on a fixed interval and never overlap. A tick that finds a
//! run in progress is moved to the next interval boundary: ticks missed while a
//! scheduled run executes are skipped by the interval itself, and a tick that
//! loses the run guard to a manually triggered run is counted as rescheduled.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::wait_for_cancel;
use super::worker::{DispatchError, DispatchWorker};

/// Configuration for the recurring job.
#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    /// Time between run starts.
    pub interval: Duration,
    /// Start the first run immediately instead of after one interval.
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            run_on_start: true,
        }
    }
}

impl ScheduleConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }
}

/// What the scheduler did before it stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub ticks: usize,
    pub completed: usize,
    /// Runs that ended because the fetch failed.
    pub failed: usize,
    /// Ticks that found another run holding the guard.
    pub rescheduled: usize,
}

/// Drives a [`DispatchWorker`] on a fixed interval until shutdown.
pub struct Scheduler {
    worker: Arc<DispatchWorker>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(worker: Arc<DispatchWorker>, config: ScheduleConfig) -> Self {
        Self { worker, config }
    }

    pub fn worker(&self) -> &Arc<DispatchWorker> {
        &self.worker
    }

    /// Runs until `shutdown` flips to `true`. A run in progress at that moment
    /// is cancelled through the same signal and awaited.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ScheduleSummary {
        let period = self.config.interval.max(Duration::from_millis(1));
        let start = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut summary = ScheduleSummary::default();
        tracing::info!(interval_secs = period.as_secs_f64(), "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = wait_for_cancel(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            summary.ticks += 1;

            match self.worker.try_run(shutdown.clone()).await {
                Ok(_) => summary.completed += 1,
                Err(DispatchError::Busy) => {
                    tracing::debug!("dispatch run in progress, rescheduling to next tick");
                    summary.rescheduled += 1;
                }
                Err(DispatchError::Fetch(_)) => summary.failed += 1,
                Err(DispatchError::Cancelled(_)) => break,
            }
        }

        tracing::info!(
            ticks = summary.ticks,
            completed = summary.completed,
            failed = summary.failed,
            rescheduled = summary.rescheduled,
            "scheduler stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchConfig, MemoryLedger, RecordingNotifier, StaticSource};
    use crate::notification::{Alert, AlertFields};
    use chrono::Utc;

    fn alert(id: &str) -> Alert {
        Alert::new(
            id,
            AlertFields {
                service_name: "api".to_string(),
                status: "active".to_string(),
                timestamp: Utc::now(),
                ..AlertFields::default()
            },
        )
    }

    #[test]
    fn test_schedule_config_default() {
        let config = ScheduleConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert!(config.run_on_start);

        let config = ScheduleConfig::new(Duration::from_secs(5)).with_run_on_start(false);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(!config.run_on_start);
    }

    #[tokio::test]
    async fn test_repeated_runs_deliver_once() {
        let source = Arc::new(StaticSource::new(vec![alert("a"), alert("b")]));
        let notifier = Arc::new(RecordingNotifier::new());
        let ledger = MemoryLedger::shared();
        let worker = Arc::new(DispatchWorker::new(
            source.clone(),
            notifier.clone(),
            ledger.clone(),
            DispatchConfig::default(),
        ));
        let scheduler = Scheduler::new(worker, ScheduleConfig::new(Duration::from_millis(20)));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        let summary = handle.await.unwrap();

        assert!(summary.completed >= 2, "summary: {:?}", summary);
        assert!(source.query_count() >= 2);
        assert_eq!(notifier.sent_count().await, 2);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_busy_tick_is_rescheduled() {
        let source = Arc::new(StaticSource::new(vec![alert("slow")]));
        let notifier = Arc::new(RecordingNotifier::new().with_delay(Duration::from_millis(150)));
        let worker = Arc::new(DispatchWorker::new(
            source,
            notifier.clone(),
            MemoryLedger::shared(),
            DispatchConfig::default(),
        ));

        // A manual run holds the guard while the scheduler ticks.
        let (tx, rx) = watch::channel(false);
        let manual = {
            let worker = Arc::clone(&worker);
            let rx = rx.clone();
            tokio::spawn(async move { worker.try_run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(worker.is_busy());

        let scheduler = Scheduler::new(
            Arc::clone(&worker),
            ScheduleConfig::new(Duration::from_millis(30)),
        );
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();

        let summary = handle.await.unwrap();
        assert!(summary.rescheduled >= 1, "summary: {:?}", summary);
        let _ = manual.await.unwrap();
        assert!(notifier.attempts() <= 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_scheduling() {
        let source = Arc::new(StaticSource::default());
        source.fail_with("cluster red").await;
        let worker = Arc::new(DispatchWorker::new(
            source.clone(),
            Arc::new(RecordingNotifier::new()),
            MemoryLedger::shared(),
            DispatchConfig::default(),
        ));
        let scheduler = Scheduler::new(worker, ScheduleConfig::new(Duration::from_millis(20)));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_millis(70)).await;
        tx.send(true).unwrap();

        let summary = handle.await.unwrap();
        assert!(summary.failed >= 2, "summary: {:?}", summary);
        assert_eq!(summary.completed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let worker = Arc::new(DispatchWorker::new(
            Arc::new(StaticSource::default()),
            Arc::new(RecordingNotifier::new()),
            MemoryLedger::shared(),
            DispatchConfig::default(),
        ));
        let scheduler = Scheduler::new(
            worker,
            ScheduleConfig::new(Duration::from_secs(3600)).with_run_on_start(false),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(1), scheduler.run(rx))
            .await
            .expect("scheduler did not stop");
        assert_eq!(summary, ScheduleSummary::default());
    }
}
