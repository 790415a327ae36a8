//! Starting and stopping the two pipeline workers.
//!
//! The producer and the writer run as separate tokio tasks that share only
//! the work queue and one [`CancellationToken`]. Shutdown is triggered by
//! the caller's `shutdown` future (Ctrl-C / SIGTERM in production) or by
//! either worker exiting on its own. Then:
//!
//! 1. the token is cancelled;
//! 2. the producer gets `producer_grace` (default 10s) to stop;
//! 3. only then is the writer told to stop, so a `put` the producer completes
//!    while winding down is still drained;
//! 4. the writer gets `writer_grace` (default 30s) to drain and final-flush.
//!
//! A worker that overruns its grace period is aborted. If that worker is the
//! writer, items it had not yet written are lost; they are re-acquired on
//! the next run because ingestion is idempotent.

use crate::analyst::Analyst;
use crate::models::IngestionItem;
use crate::producer::Producer;
use crate::queue::work_queue;
use crate::scrapers::ArticleSource;
use crate::storage::ArticleStore;
use crate::writer::{BatchWriter, WriterSummary};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long each worker may take to stop once cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownConfig {
    pub producer_grace: Duration,
    pub writer_grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            producer_grace: Duration::from_secs(10),
            writer_grace: Duration::from_secs(30),
        }
    }
}

/// Outcome of a pipeline run. `None` means the worker did not stop cleanly
/// (it panicked or overran its grace period).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub items_enqueued: Option<usize>,
    pub writer: Option<WriterSummary>,
}

/// Run `producer` and `writer` over a queue of `queue_capacity` items until
/// `shutdown` resolves, then stop them within the configured bounds.
pub async fn run_pipeline<S, A, St, F>(
    producer: Producer<S, A>,
    writer: BatchWriter<St>,
    queue_capacity: usize,
    grace: ShutdownConfig,
    shutdown: F,
) -> PipelineReport
where
    S: ArticleSource,
    A: Analyst,
    St: ArticleStore,
    F: Future<Output = ()>,
{
    let cancel = CancellationToken::new();
    let stop_writer = CancellationToken::new();
    let (tx, rx) = work_queue::<IngestionItem>(queue_capacity);

    info!(queue_capacity, "Starting producer and writer");
    let producer_task = tokio::spawn({
        // A worker exiting for any reason (including a panic) stops the other.
        let guard = cancel.clone().drop_guard();
        let fut = producer.run(tx, cancel.clone());
        async move {
            let _guard = guard;
            fut.await
        }
    });
    let writer_task = tokio::spawn({
        let guard = cancel.clone().drop_guard();
        let fut = writer.run(rx, stop_writer.clone());
        async move {
            let _guard = guard;
            fut.await
        }
    });

    tokio::select! {
        _ = shutdown => info!("Shutdown requested; stopping workers"),
        _ = cancel.cancelled() => warn!("A worker stopped on its own; shutting down"),
    }
    cancel.cancel();

    let items_enqueued = join_within("producer", producer_task, grace.producer_grace).await;
    // The producer's sender is gone now; nothing new can reach the queue.
    stop_writer.cancel();
    let writer = join_within("writer", writer_task, grace.writer_grace).await;

    info!(
        clean_producer = items_enqueued.is_some(),
        clean_writer = writer.is_some(),
        "Shutdown complete"
    );
    PipelineReport {
        items_enqueued,
        writer,
    }
}

async fn join_within<T>(name: &str, mut task: JoinHandle<T>, grace: Duration) -> Option<T> {
    match timeout(grace, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(worker = name, error = %e, "Worker task failed");
            None
        }
        Err(_) => {
            error!(worker = name, ?grace, "Worker did not stop in time; aborting it");
            task.abort();
            // Wait for the abort to land so the task's queue handle is dropped.
            let _ = task.await;
            None
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
