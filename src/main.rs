//! # Current Affairs Ingest
//!
//! A long-running service that scrapes news listing pages, keeps only
//! current-affairs articles, turns each one into study material with an LLM
//! (summary, key facts, multiple-choice questions) and stores the result in
//! SQLite.
//!
//! ## Usage
//!
//! ```sh
//! OPENAI_API_KEY=sk-... current_affairs_ingest            # run until Ctrl-C
//! current_affairs_ingest list --limit 10                   # recent articles
//! current_affairs_ingest show 42                           # one article, by id or url
//! ```
//!
//! ## Architecture
//!
//! Two workers connected by a bounded queue:
//! 1. **Producer**: discover links, fetch, gate on length, classify,
//!    summarize, archive the raw text, enqueue (blocking while the queue is full)
//! 2. **Writer**: batch items (25 items or 3 seconds), insert-or-ignore by
//!    url with retry, final flush on shutdown
//!
//! The lifecycle module starts both and stops them within bounded grace
//! periods on SIGINT / SIGTERM.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod analyst;
mod archive;
mod cli;
mod lifecycle;
mod models;
mod producer;
mod queue;
mod retry;
mod scrapers;
mod storage;
#[cfg(test)]
mod testing;
mod utils;
mod writer;

use analyst::{OpenAiAnalyst, PromptTemplate};
use archive::RawArchive;
use cli::{Cli, Command, PipelineArgs};
use lifecycle::{run_pipeline, shutdown_signal};
use models::PersistedArticle;
use producer::Producer;
use scrapers::toi::TimesOfIndia;
use storage::SqliteStore;
use writer::BatchWriter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    let command = args.command();
    debug!(?command, database_url = %args.database_url, "Parsed CLI arguments");

    if let Err(e) = args.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let store = match SqliteStore::open(&args.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(database_url = %args.database_url, error = %e, "Could not open the article store");
            return Err(e.into());
        }
    };

    match command {
        Command::Run => run(store, &args.pipeline).await,
        Command::List { limit } => {
            let articles = store.recent_articles(limit).await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
            Ok(())
        }
        Command::Show { article } => {
            let found = match article.parse::<i64>() {
                Ok(id) => store.article_by_id(id).await?,
                Err(_) => store.article_by_url(&article).await?,
            };
            // Leaves the store to be dropped normally before the process exits non-zero.
            println!("{}", render_article(&article, found)?);
            Ok(())
        }
    }
}

/// `show` looked for an article that is not stored.
#[derive(Debug, thiserror::Error)]
#[error("article not found: {0}")]
struct ArticleNotFound(String);

/// Pretty JSON for a found article. A missing one prints the not-found body
/// on stdout and becomes an error, so `main` exits with a failure status.
fn render_article(
    key: &str,
    found: Option<PersistedArticle>,
) -> Result<String, Box<dyn Error>> {
    match found {
        Some(article) => Ok(serde_json::to_string_pretty(&article)?),
        None => {
            println!("{}", serde_json::json!({ "error": "Article not found" }));
            Err(ArticleNotFound(key.to_string()).into())
        }
    }
}

async fn run(store: SqliteStore, args: &PipelineArgs) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!(stored_articles = store.count().await?, "Ingestion service starting up");

    let prompts = match &args.prompt_template {
        Some(path) => PromptTemplate::load(path).await?,
        None => PromptTemplate::default(),
    };
    if args.openai_api_key.is_none() {
        warn!("No OpenAI API key configured; every article will be classified as not relevant");
    }
    let analyst = OpenAiAnalyst::new(
        &args.openai_base_url,
        args.openai_api_key.clone(),
        args.classifier_settings(),
        args.summarizer_settings(),
        prompts,
    )?;
    let source = TimesOfIndia::new(&args.base_url)?;
    let archive = if args.no_raw_archive {
        None
    } else {
        RawArchive::open(&args.raw_archive_dir).await
    };

    let producer_config = args.producer_config()?;
    info!(
        sections = ?producer_config.sections,
        start_page = producer_config.start_page,
        end_page = producer_config.end_page,
        archive = archive.is_some(),
        "Producer configured"
    );
    let producer = Producer::new(source, analyst, archive, producer_config);
    let writer = BatchWriter::new(store, args.writer_config()?);

    let report = run_pipeline(
        producer,
        writer,
        args.queue_capacity,
        args.shutdown_config(),
        shutdown_signal(),
    )
    .await;

    let elapsed = start_time.elapsed();
    match report.writer {
        Some(summary) => info!(
            ?elapsed,
            items_enqueued = ?report.items_enqueued,
            items_written = summary.items_written,
            duplicates_skipped = summary.duplicates_skipped,
            batches_dropped = summary.batches_dropped,
            items_dropped = summary.items_dropped,
            "Execution complete"
        ),
        None => warn!(
            ?elapsed,
            items_enqueued = ?report.items_enqueued,
            "Execution complete; the writer did not finish cleanly"
        ),
    }
    Ok(())
}
