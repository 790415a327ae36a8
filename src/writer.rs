//! Batch writer: drains the work queue into storage.
//!
//! Items are accumulated in an in-memory batch and flushed with a single
//! idempotent upsert when either threshold is reached:
//!
//! - **Size**: the batch holds `batch_size` items (default 25)
//! - **Time**: the batch is non-empty and `batch_timeout` (default 3s) has
//!   passed since the last successful flush
//!
//! # Failure Handling
//!
//! Transient storage errors are retried per [`RetryPolicy`]. If a flush
//! still fails, the batch is kept for the next loop iteration and the store
//! connection is recreated. A non-transient error drops the batch after
//! logging it.
//!
//! # Shutdown
//!
//! On cancellation the writer closes the queue to new items, drains whatever
//! it already accepted, performs a final flush in chunks of `batch_size`, and
//! only then closes the store. The lifecycle cancels the writer only after
//! the producer has stopped, so nothing the producer enqueued is missed.

use crate::models::IngestionItem;
use crate::queue::{GetError, QueueReceiver};
use crate::retry::{RetryPolicy, Transient};
use crate::storage::ArticleStore;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Flush thresholds and retry settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    /// Shortest queue wait once the flush deadline has passed.
    pub min_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_timeout: Duration::from_secs(3),
            min_wait: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// What the writer did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterSummary {
    /// Rows inserted.
    pub items_written: u64,
    /// Items skipped because their url was already stored.
    pub duplicates_skipped: u64,
    pub batches_flushed: u64,
    /// Batches discarded after a non-transient error, or lost in a failed
    /// final flush.
    pub batches_dropped: u64,
    pub items_dropped: u64,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    Written,
    /// Transient failure; the batch is still buffered.
    Retained,
    /// Non-transient failure; the batch was discarded.
    Dropped,
}

/// The storage worker. Owns the batch and the store exclusively.
#[derive(Debug)]
pub struct BatchWriter<S> {
    store: S,
    config: WriterConfig,
    batch: Vec<IngestionItem>,
    last_flush: Instant,
    summary: WriterSummary,
}

impl<S: ArticleStore> BatchWriter<S> {
    pub fn new(store: S, config: WriterConfig) -> Self {
        let batch = Vec::with_capacity(config.batch_size);
        Self {
            store,
            config,
            batch,
            last_flush: Instant::now(),
            summary: WriterSummary::default(),
        }
    }

    /// Consume the queue until `cancel` fires or the queue closes, then
    /// flush what is left and close the store.
    #[instrument(level = "info", name = "writer", skip_all)]
    pub async fn run(
        mut self,
        mut queue: QueueReceiver<IngestionItem>,
        cancel: CancellationToken,
    ) -> WriterSummary {
        info!(
            batch_size = self.config.batch_size,
            batch_timeout = ?self.config.batch_timeout,
            "Writer started"
        );
        self.last_flush = Instant::now();

        loop {
            let remaining = self
                .config
                .batch_timeout
                .saturating_sub(self.last_flush.elapsed());
            let wait = if remaining.is_zero() {
                self.config.min_wait
            } else {
                remaining
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = queue.get(wait) => next,
            };

            match next {
                Ok(item) => self.batch.push(item),
                Err(GetError::Empty) => {}
                Err(GetError::Closed) => {
                    info!("Work queue closed; writer finishing");
                    break;
                }
            }

            if self.flush_due() {
                self.flush(Some(&cancel)).await;
            }
        }

        self.shutdown(queue).await
    }

    fn flush_due(&self) -> bool {
        self.batch.len() >= self.config.batch_size
            || (!self.batch.is_empty() && self.last_flush.elapsed() >= self.config.batch_timeout)
    }

    /// Write the current batch. `cancel` lets shutdown interrupt the backoff.
    async fn flush(&mut self, cancel: Option<&CancellationToken>) -> Flush {
        for item in &mut self.batch {
            item.normalize_timestamp();
        }
        let count = self.batch.len();
        info!(count, "Flushing rows to DB");

        let store = &self.store;
        let batch = self.batch.as_slice();
        let op = move || store.upsert_batch(batch);
        let result = match cancel {
            Some(token) => self.config.retry.run_cancellable(op, token).await,
            None => self.config.retry.run(op).await,
        };

        match result {
            Ok(inserted) => {
                let skipped = count as u64 - inserted;
                self.summary.items_written += inserted;
                self.summary.duplicates_skipped += skipped;
                self.summary.batches_flushed += 1;
                debug!(inserted, skipped, "Batch flushed");
                self.batch.clear();
                self.last_flush = Instant::now();
                Flush::Written
            }
            Err(e) => {
                let outcome = if e.is_transient() {
                    error!(count, error = %e, "Failed to insert batch; keeping it for the next attempt");
                    Flush::Retained
                } else {
                    // Retrying a rejected batch would fail the same way.
                    error!(count, error = %e, "Batch rejected by the database; dropping it");
                    self.summary.batches_dropped += 1;
                    self.summary.items_dropped += count as u64;
                    self.batch.clear();
                    self.last_flush = Instant::now();
                    Flush::Dropped
                };
                // The connection may be stuck mid-transaction.
                if let Err(e) = self.store.reset().await {
                    error!(error = %e, "Could not recreate database connection");
                }
                outcome
            }
        }
    }

    async fn shutdown(mut self, mut queue: QueueReceiver<IngestionItem>) -> WriterSummary {
        // Late puts are refused from here on, so every accepted item is
        // either already queued or about to land and is drained below.
        let queued = queue.len();
        queue.close();
        let mut drained = 0usize;
        loop {
            let next = match queue.try_get() {
                Err(GetError::Empty) => queue.get(self.config.min_wait).await,
                other => other,
            };
            match next {
                Ok(item) => {
                    self.batch.push(item);
                    drained += 1;
                }
                Err(GetError::Closed) => break,
                Err(GetError::Empty) => debug!("Waiting for an in-flight put before the final flush"),
            }
        }
        debug!(queued, drained, "Work queue drained");

        if !self.batch.is_empty() {
            info!(
                count = self.batch.len(),
                drained, "Final flush of rows to DB before shutdown"
            );
            let mut pending = std::mem::take(&mut self.batch);
            while !pending.is_empty() {
                let rest = pending.split_off(pending.len().min(self.config.batch_size));
                self.batch = pending;
                pending = rest;

                if self.flush(None).await == Flush::Retained {
                    let lost = self.batch.len();
                    error!(lost, "Failed final DB flush");
                    self.summary.batches_dropped += 1;
                    self.summary.items_dropped += lost as u64;
                    self.batch.clear();
                }
            }
        }

        let summary = self.summary;
        self.store.close().await;
        if summary.items_dropped > 0 {
            warn!(items_dropped = summary.items_dropped, "Writer stopped with dropped items");
        }
        info!(
            items_written = summary.items_written,
            duplicates_skipped = summary.duplicates_skipped,
            batches_flushed = summary.batches_flushed,
            "Writer stopped"
        );
        summary
    }
}
