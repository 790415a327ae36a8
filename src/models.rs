//! Data models for articles as they move through the ingestion pipeline.
//!
//! This module defines the records handed between pipeline stages:
//! - [`ExtractedArticle`]: Raw fields pulled out of an article page
//! - [`StructuredSummary`]: Summary, key facts and questions produced by the analyst
//! - [`IngestionItem`]: The normalized record queued for the batch writer
//! - [`PersistedArticle`]: A stored row as served to readers
//!
//! Reader-facing JSON uses camelCase for `imageUrl` to match the public
//! article shape.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title used when a page has no usable `<title>` element.
pub const UNTITLED_ARTICLE: &str = "Untitled Article";

/// A news article as extracted from its page, before classification.
///
/// # Fields
///
/// * `url` - Canonical article URL (query string stripped)
/// * `title` - Page title, or [`UNTITLED_ARTICLE`]
/// * `content` - Body text with paragraphs joined by a single space
/// * `image_url` - Lead image, when the page has one
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArticle {
    pub url: String,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
}

impl ExtractedArticle {
    /// Length of the body text in characters (not bytes).
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }
}

/// Structured output of the summarizer.
///
/// The model answers with `summary`, `key_facts` and `possible_questions`;
/// any of them may be missing, in which case the field is left empty.
/// `StructuredSummary::default()` is the empty triple substituted when the
/// summarizer fails.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StructuredSummary {
    /// A short prose summary of the article.
    #[serde(default)]
    pub summary: String,
    /// Key facts, in the order the model listed them.
    #[serde(default, rename = "key_facts")]
    pub facts: Vec<String>,
    /// Multiple-choice questions; the shape of each question is model-defined.
    #[serde(default, rename = "possible_questions")]
    pub mcqs: Vec<Value>,
}

/// The normalized record produced by acquisition and consumed by the writer.
///
/// `url` is the natural key: the store keeps at most one row per URL.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionItem {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub facts: Vec<String>,
    pub mcqs: Vec<Value>,
    pub timestamp: DateTime<Utc>,
    pub image_url: Option<String>,
}

impl IngestionItem {
    /// Build an item from an extracted article and its summary, stamped now.
    ///
    /// An empty or whitespace-only title is replaced by [`UNTITLED_ARTICLE`].
    pub fn new(article: ExtractedArticle, summary: StructuredSummary) -> Self {
        let title = if article.title.trim().is_empty() {
            UNTITLED_ARTICLE.to_string()
        } else {
            article.title
        };

        Self {
            url: article.url,
            title,
            summary: summary.summary,
            facts: summary.facts,
            mcqs: summary.mcqs,
            timestamp: Utc::now(),
            image_url: article.image_url,
        }
    }

    /// Truncate the timestamp to microseconds, the precision the store keeps,
    /// so a row read back compares equal to what was written.
    pub fn normalize_timestamp(&mut self) {
        self.timestamp = self.timestamp.trunc_subsecs(6);
    }
}

/// A stored article as returned by the read queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedArticle {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub facts: Vec<String>,
    pub mcqs: Vec<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn article(title: &str) -> ExtractedArticle {
        ExtractedArticle {
            url: "https://example.com/news/articleshow/1.cms".to_string(),
            title: title.to_string(),
            content: "Body".to_string(),
            image_url: Some("https://example.com/img.jpg".to_string()),
        }
    }

    #[test]
    fn test_structured_summary_uses_model_keys() {
        let json = r#"{
            "summary": "Budget passed",
            "key_facts": ["Vote was 300-200", "Takes effect in April"],
            "possible_questions": [{"question": "When?", "options": ["April", "May"], "answer": "April"}]
        }"#;

        let parsed: StructuredSummary = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.summary, "Budget passed");
        assert_eq!(parsed.facts.len(), 2);
        assert_eq!(parsed.facts[0], "Vote was 300-200");
        assert_eq!(parsed.mcqs[0]["answer"], "April");
    }

    #[test]
    fn test_structured_summary_missing_fields_default_empty() {
        let parsed: StructuredSummary = serde_json::from_str(r#"{"summary": "Only this"}"#).unwrap();
        assert_eq!(parsed.summary, "Only this");
        assert!(parsed.facts.is_empty());
        assert!(parsed.mcqs.is_empty());
    }

    #[test]
    fn test_ingestion_item_carries_all_fields() {
        let summary = StructuredSummary {
            summary: "S".to_string(),
            facts: vec!["F".to_string()],
            mcqs: vec![serde_json::json!({"question": "Q"})],
        };
        let before = Utc::now();
        let item = IngestionItem::new(article("Headline"), summary);

        assert_eq!(item.url, "https://example.com/news/articleshow/1.cms");
        assert_eq!(item.title, "Headline");
        assert_eq!(item.summary, "S");
        assert_eq!(item.facts, vec!["F".to_string()]);
        assert_eq!(item.mcqs.len(), 1);
        assert_eq!(item.image_url.as_deref(), Some("https://example.com/img.jpg"));
        assert!(item.timestamp >= before);
    }

    #[test]
    fn test_ingestion_item_blank_title_falls_back() {
        let item = IngestionItem::new(article("   "), StructuredSummary::default());
        assert_eq!(item.title, UNTITLED_ARTICLE);
    }

    #[test]
    fn test_normalize_timestamp_truncates_to_micros() {
        let mut item = IngestionItem::new(article("T"), StructuredSummary::default());
        item.timestamp = Utc
            .with_ymd_and_hms(2025, 5, 6, 14, 30, 0)
            .unwrap()
            .with_nanosecond(123_456_789)
            .unwrap();

        item.normalize_timestamp();
        assert_eq!(item.timestamp.nanosecond(), 123_456_000);
    }

    #[test]
    fn test_persisted_article_serializes_read_shape() {
        let row = PersistedArticle {
            id: 7,
            url: "https://example.com/a".to_string(),
            title: "T".to_string(),
            summary: String::new(),
            facts: vec![],
            mcqs: vec![],
            timestamp: Utc.with_ymd_and_hms(2025, 5, 6, 8, 0, 0).unwrap(),
            image_url: None,
        };

        let json = serde_json::to_value(&row).unwrap();
        for key in ["id", "url", "title", "summary", "facts", "mcqs", "timestamp", "imageUrl"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["timestamp"], "2025-05-06T08:00:00Z");
    }

    #[test]
    fn test_content_chars_counts_characters() {
        let mut a = article("T");
        a.content = "é".repeat(10);
        assert_eq!(a.content_chars(), 10);
        assert_eq!(a.content.len(), 20);
    }
}
