//! Acquisition pipeline: discover, fetch, classify, summarize, enqueue.
//!
//! The producer walks every configured section and page, and for each
//! discovered article link:
//!
//! 1. Fetches and extracts the article; fetch failures and bodies shorter
//!    than `min_content_chars` are skipped.
//! 2. Classifies a bounded prefix of the body. A classifier error counts as
//!    "not relevant".
//! 3. Summarizes the full body. A summarizer error yields an empty summary.
//! 4. Archives the raw text (best effort) and enqueues an [`IngestionItem`].
//!
//! Enqueueing retries a short timed `put` until the item fits or shutdown is
//! requested, so a slow writer slows the producer down instead of losing
//! items. After a full round the producer sleeps a random 30–90s. A round
//! that panics is logged and restarted after a short delay.

use crate::analyst::Analyst;
use crate::archive::RawArchive;
use crate::models::{IngestionItem, StructuredSummary};
use crate::queue::{PutError, QueueSender};
use crate::scrapers::ArticleSource;
use crate::utils::char_prefix;
use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::{Rng, rng};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tuning for the acquisition loop.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Site sections to scan, in order.
    pub sections: Vec<String>,
    /// First listing page scanned per section.
    pub start_page: u32,
    /// Last listing page scanned per section (inclusive).
    pub end_page: u32,
    /// Shortest body, in characters, worth classifying.
    pub min_content_chars: usize,
    /// How many body characters the classifier sees.
    pub classify_prefix_chars: usize,
    /// Pause after each processed link.
    pub pacing: Duration,
    /// Bounds of the random pause between rounds.
    pub round_sleep_min: Duration,
    pub round_sleep_max: Duration,
    /// Timeout of each `put` attempt while the queue is full.
    pub put_timeout: Duration,
    /// Pause before restarting a round that panicked.
    pub restart_delay: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            sections: ["BUSINESS", "EDUCATION", "SCIENCE", "WORLD", "NATION", "TECH"]
                .into_iter()
                .map(String::from)
                .collect(),
            start_page: 1,
            end_page: 2,
            min_content_chars: 500,
            classify_prefix_chars: 1000,
            pacing: Duration::from_millis(200),
            round_sleep_min: Duration::from_secs(30),
            round_sleep_max: Duration::from_secs(90),
            put_timeout: Duration::from_secs(1),
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Why a round stopped early.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("shutdown requested")]
    Cancelled,
    #[error("work queue closed; the writer is gone")]
    QueueClosed,
}

/// Counters for one discovery round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    /// Unique links found this round.
    pub discovered: usize,
    /// Links whose fetch or extraction failed.
    pub fetch_failed: usize,
    /// Articles below the minimum length.
    pub too_short: usize,
    /// Articles the classifier rejected (or could not classify).
    pub not_relevant: usize,
    /// Items placed on the queue.
    pub enqueued: usize,
}

/// Why a link did not produce an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    FetchFailed,
    TooShort,
    NotRelevant,
}

/// The acquisition worker.
#[derive(Debug)]
pub struct Producer<S, A> {
    source: S,
    analyst: A,
    archive: Option<RawArchive>,
    config: ProducerConfig,
    /// Items placed on the queue over the producer's lifetime, including
    /// those of a round cut short by shutdown.
    enqueued: AtomicUsize,
}

impl<S, A> Producer<S, A>
where
    S: ArticleSource,
    A: Analyst,
{
    pub fn new(source: S, analyst: A, archive: Option<RawArchive>, config: ProducerConfig) -> Self {
        Self {
            source,
            analyst,
            archive,
            config,
            enqueued: AtomicUsize::new(0),
        }
    }

    /// Run rounds until `cancel` fires or the queue closes.
    ///
    /// Returns the total number of items enqueued.
    #[instrument(level = "info", name = "producer", skip_all)]
    pub async fn run(self, queue: QueueSender<IngestionItem>, cancel: CancellationToken) -> usize {
        let mut round = 0u64;
        info!("Producer started");

        while !cancel.is_cancelled() {
            round += 1;
            let outcome = AssertUnwindSafe(self.run_round(&queue, &cancel))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(summary)) => {
                    info!(
                        round,
                        discovered = summary.discovered,
                        fetch_failed = summary.fetch_failed,
                        too_short = summary.too_short,
                        not_relevant = summary.not_relevant,
                        enqueued = summary.enqueued,
                        "Discovery round complete"
                    );
                    let pause = self.round_pause();
                    info!(?pause, "Sleeping before next round");
                    if !pause_unless_cancelled(&cancel, pause).await {
                        break;
                    }
                }
                Ok(Err(ProducerError::Cancelled)) => break,
                Ok(Err(ProducerError::QueueClosed)) => {
                    error!(round, "Work queue closed; producer stopping");
                    break;
                }
                Err(panic) => {
                    error!(
                        round,
                        panic = %panic_message(panic.as_ref()),
                        delay = ?self.config.restart_delay,
                        "Producer round failed; restarting after delay"
                    );
                    if !pause_unless_cancelled(&cancel, self.config.restart_delay).await {
                        break;
                    }
                }
            }
        }

        let total = self.enqueued.load(Ordering::Relaxed);
        info!(total_enqueued = total, "Producer stopped");
        total
    }

    /// Scan every section and page once.
    pub async fn run_round(
        &self,
        queue: &QueueSender<IngestionItem>,
        cancel: &CancellationToken,
    ) -> Result<RoundSummary, ProducerError> {
        let mut summary = RoundSummary::default();
        let mut seen = HashSet::new();

        for section in &self.config.sections {
            for page in self.config.start_page..=self.config.end_page {
                if cancel.is_cancelled() {
                    return Err(ProducerError::Cancelled);
                }

                let mut links: Vec<String> = match self.source.discover(section, page).await {
                    Ok(links) => links
                        .into_iter()
                        .filter(|link| seen.insert(link.clone()))
                        .collect(),
                    Err(e) => {
                        warn!(%section, page, error = %e, "Failed to fetch listing; skipping page");
                        continue;
                    }
                };
                summary.discovered += links.len();
                links.shuffle(&mut rng());

                for url in links {
                    if cancel.is_cancelled() {
                        return Err(ProducerError::Cancelled);
                    }

                    // Model calls can take a minute; shutdown must not wait for them.
                    let acquired = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProducerError::Cancelled),
                        acquired = self.acquire(&url) => acquired,
                    };

                    match acquired {
                        Ok(item) => {
                            self.enqueue(queue, item, cancel).await?;
                            self.enqueued.fetch_add(1, Ordering::Relaxed);
                            summary.enqueued += 1;
                            info!(%url, "Produced article -> queue");
                        }
                        Err(Skip::FetchFailed) => summary.fetch_failed += 1,
                        Err(Skip::TooShort) => summary.too_short += 1,
                        Err(Skip::NotRelevant) => summary.not_relevant += 1,
                    }

                    if !pause_unless_cancelled(cancel, self.config.pacing).await {
                        return Err(ProducerError::Cancelled);
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Turn one link into an item, or say why not.
    async fn acquire(&self, url: &str) -> Result<IngestionItem, Skip> {
        let article = match self.source.fetch(url).await {
            Ok(article) => article,
            Err(e) => {
                debug!(%url, error = %e, "Fetch failed; skipping");
                return Err(Skip::FetchFailed);
            }
        };

        let chars = article.content_chars();
        if chars < self.config.min_content_chars {
            debug!(%url, chars, min = self.config.min_content_chars, "Skipping short/invalid article");
            return Err(Skip::TooShort);
        }

        let prefix = char_prefix(&article.content, self.config.classify_prefix_chars);
        let relevant = match self.analyst.classify(prefix).await {
            Ok(relevant) => relevant,
            Err(e) => {
                warn!(%url, error = %e, "Relevance check failed; treating as not relevant");
                false
            }
        };
        if !relevant {
            debug!(%url, title = %article.title, "Not current affairs");
            return Err(Skip::NotRelevant);
        }

        let summary = match self.analyst.summarize(&article.content).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(%url, error = %e, "Structured summary failed; storing article without it");
                StructuredSummary::default()
            }
        };

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(&article.title, &article.content).await {
                debug!(%url, error = %e, "Could not write raw archive file");
            }
        }

        Ok(IngestionItem::new(article, summary))
    }

    /// Put `item` on the queue, waiting as long as it takes unless cancelled.
    async fn enqueue(
        &self,
        queue: &QueueSender<IngestionItem>,
        mut item: IngestionItem,
        cancel: &CancellationToken,
    ) -> Result<(), ProducerError> {
        let mut waits = 0u32;
        loop {
            if cancel.is_cancelled() {
                warn!(url = %item.url, "Shutdown while waiting for queue space; item not enqueued");
                return Err(ProducerError::Cancelled);
            }
            match queue.put(item, self.config.put_timeout).await {
                Ok(()) => return Ok(()),
                Err(PutError::Full(back)) => {
                    waits += 1;
                    warn!(waits, queued = queue.len(), "Queue full; producer waiting to put item");
                    item = back;
                }
                Err(closed @ PutError::Closed(_)) => {
                    let item = closed.into_inner();
                    error!(url = %item.url, "Queue closed; item not enqueued");
                    return Err(ProducerError::QueueClosed);
                }
            }
        }
    }

    fn round_pause(&self) -> Duration {
        let min = self.config.round_sleep_min.as_millis() as u64;
        let max = self.config.round_sleep_max.as_millis() as u64;
        if max <= min {
            return self.config.round_sleep_min;
        }
        Duration::from_millis(rng().random_range(min..=max))
    }
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn pause_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
