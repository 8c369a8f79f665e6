//! Alert dispatch: the recurring delivery job and the capabilities it uses.
//!
//! A run fetches recent alerts from an [`AlertSource`], delivers each one
//! through a [`Notifier`] with bounded concurrency, and records deliveries in a
//! [`DedupLedger`] so overlapping runs never send the same alert twice.
//! Cancellation travels on a `watch::Receiver<bool>` that flips to `true`.

pub mod memory;
pub mod ports;
pub mod schedule;
pub mod worker;

pub use memory::{MemoryLedger, RecordingNotifier, StaticSource};
pub use ports::{AlertSource, DedupLedger, LedgerEntry, Notifier};
pub use schedule::{ScheduleConfig, ScheduleSummary, Scheduler};
pub use worker::{DispatchConfig, DispatchError, DispatchWorker, RunReport};

use tokio::sync::watch;

/// Resolves once `cancel` holds `true`. If the sender is dropped without
/// cancelling, it never resolves.
pub async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
