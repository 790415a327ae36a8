//! Deterministic in-memory fakes shared by the unit tests.

use crate::analyst::{Analyst, AnalystError};
use crate::models::{ExtractedArticle, IngestionItem, StructuredSummary};
use crate::scrapers::{ArticleSource, SourceError};
use crate::storage::{ArticleStore, StoreError};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A body of exactly `chars` characters.
pub fn long_text(chars: usize) -> String {
    "lorem ipsum ".chars().cycle().take(chars).collect()
}

/// An item for `url` with a short fixed payload.
pub fn item(url: &str) -> IngestionItem {
    IngestionItem::new(
        ExtractedArticle {
            url: url.to_string(),
            title: format!("Title of {url}"),
            content: String::new(),
            image_url: None,
        },
        StructuredSummary {
            summary: "summary".to_string(),
            facts: vec!["fact".to_string()],
            mcqs: Vec::new(),
        },
    )
}

#[derive(Debug, Default)]
pub struct FakeSource {
    pages: HashMap<(String, u32), Vec<String>>,
    failing_pages: HashSet<(String, u32)>,
    articles: HashMap<String, ExtractedArticle>,
    fetches: AtomicUsize,
    panic_next_discover: AtomicBool,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, section: &str, page: u32, links: &[&str]) -> Self {
        self.pages.insert(
            (section.to_string(), page),
            links.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn failing_page(mut self, section: &str, page: u32) -> Self {
        self.failing_pages.insert((section.to_string(), page));
        self
    }

    pub fn article(mut self, url: &str, title: &str, content: &str) -> Self {
        self.articles.insert(
            url.to_string(),
            ExtractedArticle {
                url: url.to_string(),
                title: title.to_string(),
                content: content.to_string(),
                image_url: Some(format!("{url}.jpg")),
            },
        );
        self
    }

    pub fn panic_on_first_discover(self) -> Self {
        self.panic_next_discover.store(true, Ordering::SeqCst);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ArticleSource for FakeSource {
    async fn discover(&self, section: &str, page: u32) -> Result<Vec<String>, SourceError> {
        if self.panic_next_discover.swap(false, Ordering::SeqCst) {
            panic!("listing parser blew up");
        }
        let key = (section.to_string(), page);
        if self.failing_pages.contains(&key) {
            return Err(SourceError::Url(url::ParseError::EmptyHost));
        }
        Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }

    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.articles
            .get(url)
            .cloned()
            .ok_or(SourceError::Url(url::ParseError::EmptyHost))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    Fail,
}

#[derive(Debug)]
pub struct FakeAnalyst {
    verdict: Verdict,
    fail_summaries: bool,
    hang_summaries: bool,
    classified: Mutex<Vec<usize>>,
    summarized: Mutex<Vec<usize>>,
}

impl FakeAnalyst {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            fail_summaries: false,
            hang_summaries: false,
            classified: Mutex::new(Vec::new()),
            summarized: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_summaries(mut self) -> Self {
        self.fail_summaries = true;
        self
    }

    /// Summaries never complete, like a stalled model endpoint.
    pub fn hanging_summaries(mut self) -> Self {
        self.hang_summaries = true;
        self
    }

    pub fn classified_lengths(&self) -> Vec<usize> {
        self.classified.lock().unwrap().clone()
    }

    pub fn summarized_lengths(&self) -> Vec<usize> {
        self.summarized.lock().unwrap().clone()
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarized.lock().unwrap().len()
    }
}

impl Analyst for FakeAnalyst {
    async fn classify(&self, text: &str) -> Result<bool, AnalystError> {
        self.classified.lock().unwrap().push(text.chars().count());
        match self.verdict {
            Verdict::Yes => Ok(true),
            Verdict::No => Ok(false),
            Verdict::Fail => Err(AnalystError::EmptyResponse),
        }
    }

    async fn summarize(&self, text: &str) -> Result<StructuredSummary, AnalystError> {
        self.summarized.lock().unwrap().push(text.chars().count());
        if self.hang_summaries {
            std::future::pending::<()>().await;
        }
        if self.fail_summaries {
            return Err(AnalystError::MissingApiKey);
        }
        Ok(StructuredSummary {
            summary: "summary".to_string(),
            facts: vec!["fact".to_string()],
            mcqs: vec![serde_json::json!({"question": "Q?", "options": ["a", "b"], "answer": "a"})],
        })
    }
}

/// How the next upsert attempt should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Fatal,
    Hang,
    /// Succeeds, but only after the given delay.
    Slow(Duration),
}

/// Observable state of a [`FakeStore`], shared with the test.
#[derive(Debug, Default)]
pub struct StoreState {
    /// Rows keyed by url, first write wins.
    pub rows: BTreeMap<String, IngestionItem>,
    /// Urls of every committed batch, in commit order.
    pub batches: Vec<Vec<String>>,
    pub attempts: usize,
    pub resets: usize,
    pub closed: bool,
    /// Rows present when `close` was called.
    pub rows_at_close: Option<usize>,
    failures: VecDeque<Failure>,
}

/// In-memory insert-or-ignore store with scripted failures.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<StoreState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` upsert attempts fail with `failure`.
    pub fn fail_next(&self, n: usize, failure: Failure) {
        let mut state = self.state.lock().unwrap();
        state.failures.extend(std::iter::repeat_n(failure, n));
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().batches.iter().map(Vec::len).collect()
    }

    fn commit(&self, items: &[IngestionItem]) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for item in items {
            if !state.rows.contains_key(&item.url) {
                state.rows.insert(item.url.clone(), item.clone());
                inserted += 1;
            }
        }
        state.batches.push(items.iter().map(|i| i.url.clone()).collect());
        inserted
    }
}

impl ArticleStore for FakeStore {
    async fn upsert_batch(&self, items: &[IngestionItem]) -> Result<u64, StoreError> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.failures.pop_front()
        };

        match failure {
            Some(Failure::Transient) => Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
            Some(Failure::Fatal) => Err(StoreError::Database(sqlx::Error::ColumnNotFound(
                "title".to_string(),
            ))),
            Some(Failure::Hang) => std::future::pending().await,
            Some(Failure::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.commit(items))
            }
            None => Ok(self.commit(items)),
        }
    }

    async fn reset(&mut self) -> Result<(), StoreError> {
        self.state.lock().unwrap().resets += 1;
        Ok(())
    }

    async fn close(self) {
        let mut state = self.state.lock().unwrap();
        state.rows_at_close = Some(state.rows.len());
        state.closed = true;
    }
}
