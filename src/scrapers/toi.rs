//! Times of India article scraper.
//!
//! Section listings live at `{base}/{SECTION}?page={n}` and link to articles
//! whose paths contain `articleshow`. Article pages carry the body in
//! `div._s30J.clearfix` blocks and the lead image inside `div.wJnIp`.
//!
//! # URL Pattern
//!
//! Links are resolved against the base URL and stripped of their query
//! string, e.g. `/india/some-story/articleshow/123.cms?from=mdr` becomes
//! `https://timesofindia.indiatimes.com/india/some-story/articleshow/123.cms`.

use super::{ArticleSource, SourceError};
use crate::models::{ExtractedArticle, UNTITLED_ARTICLE};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Default site root.
pub const DEFAULT_BASE_URL: &str = "https://timesofindia.indiatimes.com";

/// Path fragment identifying article links.
const ARTICLE_MARKER: &str = "articleshow";

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("valid selector"));
static IMAGE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.wJnIp img[src]").expect("valid selector"));
static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div._s30J.clearfix").expect("valid selector"));

/// Scraper for a Times of India style site.
#[derive(Debug, Clone)]
pub struct TimesOfIndia {
    client: reqwest::Client,
    base_url: Url,
}

impl TimesOfIndia {
    /// Create a scraper rooted at `base_url` with a 10 second request timeout.
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    fn listing_url(&self, section: &str, page: u32) -> Result<Url, SourceError> {
        let mut url = self.base_url.join(section)?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn get_text(&self, url: &str) -> Result<String, SourceError> {
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }
}

impl ArticleSource for TimesOfIndia {
    #[instrument(level = "info", skip(self))]
    async fn discover(&self, section: &str, page: u32) -> Result<Vec<String>, SourceError> {
        let listing = self.listing_url(section, page)?;
        let html = self.get_text(listing.as_str()).await?;
        let links = extract_article_links(&html, &self.base_url);

        info!(count = links.len(), %listing, "Indexed article URLs");
        Ok(links)
    }

    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, SourceError> {
        let body = self.get_text(url).await?;
        let article = extract_article(url, &body);
        debug!(chars = article.content_chars(), "Parsed article");
        Ok(article)
    }
}

/// Absolute, query-free URLs of every `articleshow` link in `html`.
pub fn extract_article_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.contains(ARTICLE_MARKER))
        .filter_map(|href| base.join(href).ok())
        .map(|mut url| {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        })
        .collect()
}

/// Pull title, body text and lead image out of an article page.
pub fn extract_article(url: &str, html: &str) -> ExtractedArticle {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_ARTICLE.to_string());

    let image_url = document
        .select(&IMAGE_SELECTOR)
        .find_map(|img| img.value().attr("src"))
        .map(str::to_string);

    let content = document
        .select(&BODY_SELECTOR)
        .map(|block| block.text().collect::<String>().split_whitespace().join(" "))
        .filter(|text| !text.is_empty())
        .join(" ");

    ExtractedArticle {
        url: url.to_string(),
        title,
        content,
        image_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <a href="/india/budget-passes/articleshow/101.cms?from=mdr">Budget</a>
          <a href="https://timesofindia.indiatimes.com/world/summit/articleshow/102.cms">Summit</a>
          <a href="/india/budget-passes/articleshow/101.cms">Budget again</a>
          <a href="/videos/some-clip/videoshow/9.cms">Video</a>
          <a href="/">Home</a>
        </body></html>
    "#;

    const ARTICLE: &str = r#"
        <html><head><title> Budget passes in Parliament </title></head><body>
          <div class="wJnIp"><img src="https://static.toi.example/lead.jpg"></div>
          <div class="_s30J clearfix">First paragraph.</div>
          <div class="_s30J clearfix">Second <b>bold</b> paragraph.</div>
          <div class="unrelated">Ignore me</div>
        </body></html>
    "#;

    #[test]
    fn test_extract_article_links_filters_and_normalizes() {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap();
        let links = extract_article_links(LISTING, &base);

        assert_eq!(
            links,
            vec![
                "https://timesofindia.indiatimes.com/india/budget-passes/articleshow/101.cms",
                "https://timesofindia.indiatimes.com/world/summit/articleshow/102.cms",
                "https://timesofindia.indiatimes.com/india/budget-passes/articleshow/101.cms",
            ]
        );
    }

    #[test]
    fn test_extract_article_fields() {
        let article = extract_article("https://toi.example/a", ARTICLE);

        assert_eq!(article.url, "https://toi.example/a");
        assert_eq!(article.title, "Budget passes in Parliament");
        assert_eq!(article.image_url.as_deref(), Some("https://static.toi.example/lead.jpg"));
        assert_eq!(article.content, "First paragraph. Second bold paragraph.");
    }

    #[test]
    fn test_extract_article_without_title_uses_sentinel() {
        let article = extract_article("https://toi.example/a", "<html><body></body></html>");
        assert_eq!(article.title, UNTITLED_ARTICLE);
        assert!(article.content.is_empty());
        assert!(article.image_url.is_none());
    }

    #[test]
    fn test_listing_url() {
        let source = TimesOfIndia::new(DEFAULT_BASE_URL).unwrap();
        let url = source.listing_url("WORLD", 2).unwrap();
        assert_eq!(url.as_str(), "https://timesofindia.indiatimes.com/WORLD?page=2");
    }
}
