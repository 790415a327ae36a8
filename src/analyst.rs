//! Article classification and summarization through an LLM.
//!
//! The pipeline talks to the model only through the [`Analyst`] trait, which
//! has two operations:
//! - [`Analyst::classify`]: is this article current affairs? (yes/no)
//! - [`Analyst::summarize`]: summary, key facts and quiz questions as JSON
//!
//! [`OpenAiAnalyst`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint. Prompts come from a [`PromptTemplate`],
//! either the built-in one or a YAML file passed on the command line.
//!
//! This module never decides what a failure means for an article; the
//! producer maps classifier errors to "not relevant" and summarizer errors
//! to an empty summary.

use crate::models::StructuredSummary;
use crate::utils::truncate_for_log;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Placeholder in the classifier prompt replaced by the article text.
const ARTICLE_PLACEHOLDER: &str = "{article}";

/// Errors from the model endpoint or from interpreting its answer.
#[derive(Debug, Error)]
pub enum AnalystError {
    #[error("no API key configured for the model endpoint")]
    MissingApiKey,
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model returned no message content")]
    EmptyResponse,
    #[error("model returned malformed summary JSON ({source}): {preview}")]
    MalformedSummary {
        #[source]
        source: serde_json::Error,
        preview: String,
    },
}

/// Errors loading a prompt template file.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("could not read prompt template: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse prompt template: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The black-box classification and summarization service.
pub trait Analyst: Send + Sync + 'static {
    /// Decide whether `text` is about current affairs, politics, world news
    /// or the economy.
    fn classify(&self, text: &str) -> impl Future<Output = Result<bool, AnalystError>> + Send;

    /// Produce a structured summary of `text`.
    fn summarize(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<StructuredSummary, AnalystError>> + Send;
}

/// System prompts for the two model calls.
///
/// # YAML Format
///
/// ```yaml
/// classifier: |
///   Decide if the following article is about current affairs ...
///   Article: {article}
/// summarizer: |
///   You turn news articles into study notes ...
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    /// Classifier system prompt; `{article}` is replaced by the article prefix.
    pub classifier: String,
    /// Summarizer system prompt; the article is sent as the user message.
    pub summarizer: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            classifier: "Decide if the following article is about current affairs, politics, \
                world news, or economy.\nAnswer with YES or NO only.\nArticle: {article}"
                .to_string(),
            summarizer: "You turn news articles into concise study notes. Respond with a single \
                JSON object and nothing else, with these keys:\n\
                \"summary\": a 3-4 sentence summary of the article,\n\
                \"key_facts\": an array of short factual statements from the article,\n\
                \"possible_questions\": an array of multiple-choice questions, each an object \
                with \"question\", \"options\" (array of 4 strings) and \"answer\"."
                .to_string(),
        }
    }
}

impl PromptTemplate {
    /// Load prompts from a YAML file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    fn classifier_prompt(&self, article: &str) -> String {
        self.classifier.replace(ARTICLE_PLACEHOLDER, article)
    }
}

/// Model name and sampling temperature for one kind of call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// [`Analyst`] backed by an OpenAI-compatible chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAiAnalyst {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    classifier: ModelSettings,
    summarizer: ModelSettings,
    prompts: PromptTemplate,
}

impl OpenAiAnalyst {
    /// Create an analyst.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Bearer token; without one every call fails (and the
    ///   producer then rejects every article)
    /// * `classifier` / `summarizer` - Model and temperature per call
    /// * `prompts` - System prompts
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        classifier: ModelSettings,
        summarizer: ModelSettings,
        prompts: PromptTemplate,
    ) -> Result<Self, AnalystError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            classifier,
            summarizer,
            prompts,
        })
    }

    async fn complete(
        &self,
        settings: &ModelSettings,
        messages: Vec<ChatMessage<'_>>,
    ) -> Result<String, AnalystError> {
        let api_key = self.api_key.as_deref().ok_or(AnalystError::MissingApiKey)?;
        let request = ChatRequest {
            model: &settings.model,
            messages,
            temperature: settings.temperature,
        };

        let t0 = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;
        debug!(
            model = %settings.model,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Model call completed"
        );

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AnalystError::EmptyResponse)
    }
}

impl Analyst for OpenAiAnalyst {
    #[instrument(level = "debug", skip_all, fields(chars = text.len()))]
    async fn classify(&self, text: &str) -> Result<bool, AnalystError> {
        let prompt = self.prompts.classifier_prompt(text);
        let answer = self
            .complete(
                &self.classifier,
                vec![ChatMessage {
                    role: "system",
                    content: &prompt,
                }],
            )
            .await?;
        Ok(parse_yes_no(&answer))
    }

    #[instrument(level = "debug", skip_all, fields(chars = text.len()))]
    async fn summarize(&self, text: &str) -> Result<StructuredSummary, AnalystError> {
        let answer = self
            .complete(
                &self.summarizer,
                vec![
                    ChatMessage {
                        role: "system",
                        content: &self.prompts.summarizer,
                    },
                    ChatMessage {
                        role: "user",
                        content: text,
                    },
                ],
            )
            .await?;
        parse_summary(&answer)
    }
}

/// `true` only for an unambiguous "yes" answer.
pub fn parse_yes_no(answer: &str) -> bool {
    answer
        .trim()
        .trim_end_matches(['.', '!'])
        .eq_ignore_ascii_case("yes")
}

/// Parse the summarizer's JSON answer, tolerating a Markdown code fence.
pub fn parse_summary(answer: &str) -> Result<StructuredSummary, AnalystError> {
    let body = strip_code_fence(answer);
    serde_json::from_str(body).map_err(|source| {
        warn!(error = %source, "Summarizer answer is not valid JSON");
        AnalystError::MalformedSummary {
            source,
            preview: truncate_for_log(body, 300),
        }
    })
}

fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().trim_end_matches("```").trim()
}
