//! Durable article storage.
//!
//! The batch writer only sees the [`ArticleStore`] trait: an idempotent batch
//! upsert plus a `reset()` that throws away a possibly broken connection and
//! opens a fresh one. [`SqliteStore`] is the production implementation; it
//! also serves the read queries used by the `list` and `show` subcommands.
//!
//! # Schema
//!
//! ```text
//! articles(id INTEGER PK, url TEXT UNIQUE NOT NULL, title TEXT NOT NULL,
//!          summary TEXT, facts TEXT, mcqs TEXT, timestamp TEXT NOT NULL,
//!          image_url TEXT)
//! ```
//!
//! `facts` and `mcqs` hold JSON arrays.

use crate::models::{IngestionItem, PersistedArticle};
use crate::retry::Transient;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// Primary SQLite result codes worth retrying.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CANTOPEN: i32 = 14;

/// Bound parameters per inserted row.
const COLUMNS_PER_ROW: usize = 7;
/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` (3.32+).
const MAX_BIND_VARIABLES: usize = 32_766;
/// Rows per `INSERT` statement; larger batches use several statements.
const MAX_ROWS_PER_INSERT: usize = MAX_BIND_VARIABLES / COLUMNS_PER_ROW;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("could not prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode {field} for {url}: {source}")]
    Encode {
        url: String,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored {field} of article {id} is not valid JSON: {source}")]
    Decode {
        id: i64,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => is_transient_sqlx(e),
            StoreError::Io(_) | StoreError::Encode { .. } | StoreError::Decode { .. } => false,
        }
    }
}

/// Connectivity, pool and busy/locked failures are transient; constraint
/// violations, decode errors and the like are not.
fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| {
                // Extended result codes carry the primary code in the low byte.
                matches!(
                    code & 0xff,
                    SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR | SQLITE_CANTOPEN
                )
            }),
        _ => false,
    }
}

/// Write side of article storage, as used by the batch writer.
pub trait ArticleStore: Send + Sync + 'static {
    /// Insert every item whose `url` is not stored yet, in one transaction.
    ///
    /// Items whose `url` already exists (in the store or earlier in the same
    /// batch) are skipped without error. Returns the number of rows inserted.
    fn upsert_batch(
        &self,
        items: &[IngestionItem],
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Drop the current connection and open a new one.
    fn reset(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Release the connection.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// SQLite-backed store holding exactly one connection.
#[derive(Debug)]
pub struct SqliteStore {
    options: SqliteConnectOptions,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and make sure
    /// the `articles` table exists.
    ///
    /// # Arguments
    ///
    /// * `database_url` - A sqlx SQLite URL such as `sqlite://data/articles.db`
    ///
    /// # Errors
    ///
    /// Fails if the URL is malformed, the parent directory cannot be created,
    /// or the database cannot be opened. Callers treat this as fatal.
    #[instrument(level = "info", skip_all, fields(%database_url))]
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = connect(&options).await?;
        let store = Self { options, pool };
        store.create_table().await?;
        info!("Article store ready");
        Ok(store)
    }

    async fn create_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                summary TEXT,
                facts TEXT,
                mcqs TEXT,
                timestamp TEXT NOT NULL,
                image_url TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_timestamp ON articles (timestamp DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Most recent articles first, at most `limit` of them.
    pub async fn recent_articles(&self, limit: u32) -> Result<Vec<PersistedArticle>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, url, title, summary, facts, mcqs, timestamp, image_url
             FROM articles ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// Article with the given id, or `None`.
    pub async fn article_by_id(&self, id: i64) -> Result<Option<PersistedArticle>, StoreError> {
        let row = sqlx::query(
            "SELECT id, url, title, summary, facts, mcqs, timestamp, image_url
             FROM articles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    /// Article stored under `url`, or `None`.
    pub async fn article_by_url(&self, url: &str) -> Result<Option<PersistedArticle>, StoreError> {
        let row = sqlx::query(
            "SELECT id, url, title, summary, facts, mcqs, timestamp, image_url
             FROM articles WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_row).transpose()
    }

    /// Number of stored articles.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn connect(options: &SqliteConnectOptions) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options.clone())
        .await
}

/// An item with its JSON columns already serialized.
struct EncodedRow<'a> {
    item: &'a IngestionItem,
    facts: String,
    mcqs: String,
}

impl<'a> EncodedRow<'a> {
    fn encode(item: &'a IngestionItem) -> Result<Self, StoreError> {
        let encode_err = |field, source| StoreError::Encode {
            url: item.url.clone(),
            field,
            source,
        };
        Ok(Self {
            item,
            facts: serde_json::to_string(&item.facts).map_err(|e| encode_err("facts", e))?,
            mcqs: serde_json::to_string(&item.mcqs).map_err(|e| encode_err("mcqs", e))?,
        })
    }
}

impl ArticleStore for SqliteStore {
    #[instrument(level = "debug", skip_all, fields(items = items.len()))]
    async fn upsert_batch(&self, items: &[IngestionItem]) -> Result<u64, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        let rows = items
            .iter()
            .map(EncodedRow::encode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO articles (url, title, summary, facts, mcqs, timestamp, image_url) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(&row.item.url)
                    .push_bind(&row.item.title)
                    .push_bind(&row.item.summary)
                    .push_bind(&row.facts)
                    .push_bind(&row.mcqs)
                    .push_bind(row.item.timestamp)
                    .push_bind(row.item.image_url.as_deref());
            });
            builder.push(" ON CONFLICT(url) DO NOTHING");

            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        debug!(inserted, skipped = items.len() as u64 - inserted, "Batch committed");
        Ok(inserted)
    }

    async fn reset(&mut self) -> Result<(), StoreError> {
        warn!("Recreating database connection");
        self.pool.close().await;
        self.pool = connect(&self.options).await?;
        Ok(())
    }

    async fn close(self) {
        self.pool.close().await;
        info!("Article store closed");
    }
}

fn decode_row(row: &SqliteRow) -> Result<PersistedArticle, StoreError> {
    let id: i64 = row.try_get("id")?;
    let decode_json = |field: &'static str| -> Result<Option<String>, StoreError> {
        Ok(row.try_get::<Option<String>, _>(field)?)
    };

    let facts = match decode_json("facts")? {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
            id,
            field: "facts",
            source,
        })?,
        None => Vec::new(),
    };
    let mcqs = match decode_json("mcqs")? {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
            id,
            field: "mcqs",
            source,
        })?,
        None => Vec::new(),
    };

    Ok(PersistedArticle {
        id,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        summary: row.try_get::<Option<String>, _>("summary")?.unwrap_or_default(),
        facts,
        mcqs,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
        image_url: row.try_get("image_url")?,
    })
}
