//! News site scrapers.
//!
//! A scraper is anything implementing [`ArticleSource`], which follows a
//! two-phase pattern:
//!
//! 1. **Discovery**: list candidate article URLs on one page of one section
//! 2. **Fetching**: download one article and extract its fields
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Times of India | [`toi`] | HTML scraping | `/{SECTION}?page=N` listings, `articleshow` links |
//!
//! Failures are returned, never panicked on; the producer logs them and
//! skips the page or article.

use crate::models::ExtractedArticle;
use std::future::Future;
use thiserror::Error;

pub mod toi;

/// Errors raised while discovering or fetching articles.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A site the producer can discover and fetch articles from.
pub trait ArticleSource: Send + Sync + 'static {
    /// Article URLs linked from `page` of `section`. May contain duplicates.
    fn discover(
        &self,
        section: &str,
        page: u32,
    ) -> impl Future<Output = Result<Vec<String>, SourceError>> + Send;

    /// Download `url` and extract title, body text and lead image.
    fn fetch(&self, url: &str)
    -> impl Future<Output = Result<ExtractedArticle, SourceError>> + Send;
}
