//! Process wiring: builds the worker from settings and runs it as a
//! one-shot pass or as a long-running service.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;

use crate::api::{create_router, ApiState, ServerConfig};
use crate::dispatch::{
    wait_for_cancel, AlertSource, DedupLedger, DispatchError, DispatchWorker, MemoryLedger, Notifier,
    RecordingNotifier, RunReport, ScheduleConfig, ScheduleSummary, Scheduler,
};
use crate::error::AppError;
use crate::integrations::{ElasticClient, TelegramNotifier};
use crate::settings::AppConfig;

/// Builds a worker backed by Elasticsearch and Telegram.
///
/// With `dry_run`, alerts are still read from Elasticsearch but messages are
/// only recorded in memory and the ledger is an in-memory one, so nothing is
/// sent or written.
pub fn build_worker(config: &AppConfig, dry_run: bool) -> Result<DispatchWorker, AppError> {
    let elastic = Arc::new(ElasticClient::new(
        config.elasticsearch.clone(),
        config.classifier(),
    )?);
    let source: Arc<dyn AlertSource> = elastic.clone();

    let notifier: Arc<dyn Notifier>;
    let ledger: Arc<dyn DedupLedger>;
    if dry_run {
        tracing::warn!("dry run: messages are not sent and deliveries are not recorded");
        notifier = Arc::new(RecordingNotifier::new());
        ledger = MemoryLedger::shared();
    } else {
        notifier = Arc::new(TelegramNotifier::new(config.telegram.clone())?);
        ledger = elastic;
    }

    Ok(DispatchWorker::new(
        source,
        notifier,
        ledger,
        config.dispatch_config(),
    ))
}

/// Runs a single guarded pass. Ctrl-C cancels it.
pub async fn run_once(worker: Arc<DispatchWorker>) -> Result<RunReport, DispatchError> {
    let (tx, rx) = watch::channel(false);
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    let result = worker.try_run(rx).await;
    watcher.abort();
    result
}

/// Runs the scheduler, plus the HTTP server when enabled, until `shutdown`
/// flips. The scheduler is drained before the server stops.
pub async fn serve(
    worker: Arc<DispatchWorker>,
    schedule: ScheduleConfig,
    server: &ServerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<ScheduleSummary, AppError> {
    let http = if server.enabled {
        let addr = server.socket_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            AppError::internal(format!("failed to bind http server on {}", addr)).with_cause(e)
        })?;
        tracing::info!(address = %addr, "http server listening");

        let router = create_router(ApiState::new(Arc::clone(&worker), shutdown.clone()));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { wait_for_cancel(&mut stop_rx).await })
                .await
        });
        Some((stop_tx, handle))
    } else {
        None
    };

    let summary = Scheduler::new(worker, schedule).run(shutdown).await;

    if let Some((stop_tx, handle)) = http {
        let _ = stop_tx.send(true);
        match handle.await {
            Ok(Ok(())) => tracing::info!("http server stopped"),
            Ok(Err(err)) => tracing::error!(error = %err, "http server failed"),
            Err(err) => tracing::error!(error = %err, "http server task panicked"),
        }
    }

    Ok(summary)
}

/// Runs [`serve`] until Ctrl-C or SIGTERM.
pub async fn run_service(
    worker: Arc<DispatchWorker>,
    config: &AppConfig,
) -> Result<ScheduleSummary, AppError> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    serve(worker, config.schedule_config(), &config.server, rx).await
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
