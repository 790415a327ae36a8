//! Command-line interface definitions for the ingestion service.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every pipeline option can be provided via a command-line flag or an
//! environment variable; the flag wins when both are set.

use crate::analyst::ModelSettings;
use crate::lifecycle::ShutdownConfig;
use crate::producer::ProducerConfig;
use crate::queue::DEFAULT_CAPACITY;
use crate::retry::RetryPolicy;
use crate::scrapers::toi::DEFAULT_BASE_URL;
use crate::writer::WriterConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the ingestion service.
///
/// # Examples
///
/// ```sh
/// # Run the pipeline until Ctrl-C / SIGTERM (options go before the subcommand)
/// current_affairs_ingest --openai-api-key sk-... --sections WORLD,NATION run
///
/// # Same thing; `run` is the default subcommand
/// OPENAI_API_KEY=sk-... current_affairs_ingest
///
/// # Inspect what has been stored
/// current_affairs_ingest list --limit 10
/// current_affairs_ingest show 42
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database URL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://data/articles.db",
        global = true
    )]
    pub database_url: String,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scrape, classify, summarize and store articles until interrupted
    Run,
    /// Print the most recent stored articles as JSON
    List {
        /// Maximum number of articles to print
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Print one stored article as JSON
    Show {
        /// Article id, or the article's url
        article: String,
    },
}

/// Options of the `run` command.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Capacity of the in-memory work queue
    #[arg(long, env = "QUEUE_MAXSIZE", default_value_t = DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// Items per database write
    #[arg(long, env = "DB_BATCH_SIZE", default_value_t = 25)]
    pub batch_size: usize,

    /// Seconds before a partial batch is written
    #[arg(long, env = "DB_BATCH_TIMEOUT", default_value_t = 3.0)]
    pub batch_timeout_secs: f64,

    /// Seconds to pause after each processed article link
    #[arg(long, env = "PRODUCER_SLEEP", default_value_t = 0.2)]
    pub producer_sleep_secs: f64,

    /// Root URL of the news site
    #[arg(long, env = "NEWS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Listing sections to scan, comma separated
    #[arg(
        long,
        env = "NEWS_SECTIONS",
        value_delimiter = ',',
        default_value = "BUSINESS,EDUCATION,SCIENCE,WORLD,NATION,TECH"
    )]
    pub sections: Vec<String>,

    /// First listing page per section
    #[arg(long, env = "START_PAGE", default_value_t = 1)]
    pub start_page: u32,

    /// Last listing page per section (inclusive)
    #[arg(long, env = "END_PAGE", default_value_t = 2)]
    pub end_page: u32,

    /// Shortest article body (in characters) worth classifying
    #[arg(long, env = "MIN_CONTENT_CHARS", default_value_t = 500)]
    pub min_content_chars: usize,

    /// Number of body characters sent to the classifier
    #[arg(long, env = "CLASSIFY_PREFIX_CHARS", default_value_t = 1000)]
    pub classify_prefix_chars: usize,

    /// Lower bound of the random pause between rounds, in seconds
    #[arg(long, default_value_t = 30)]
    pub round_sleep_min_secs: u64,

    /// Upper bound of the random pause between rounds, in seconds
    #[arg(long, default_value_t = 90)]
    pub round_sleep_max_secs: u64,

    /// Directory for raw article texts
    #[arg(long, env = "RAW_ARCHIVE_DIR", default_value = "data/raw_articles")]
    pub raw_archive_dir: PathBuf,

    /// Do not keep raw article texts
    #[arg(long)]
    pub no_raw_archive: bool,

    /// Root of the OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// API key for the language model
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model used for the relevance check
    #[arg(long, env = "CLASSIFIER_MODEL", default_value = "gpt-4o-mini")]
    pub classifier_model: String,

    /// Model used for summaries
    #[arg(long, env = "SUMMARIZER_MODEL", default_value = "gpt-4o-mini")]
    pub summarizer_model: String,

    #[arg(long, default_value_t = 0.0)]
    pub classifier_temperature: f32,

    #[arg(long, default_value_t = 0.3)]
    pub summarizer_temperature: f32,

    /// Optional YAML file overriding the built-in prompts
    #[arg(long, env = "PROMPT_TEMPLATE")]
    pub prompt_template: Option<PathBuf>,

    /// Seconds the producer gets to stop on shutdown
    #[arg(long, default_value_t = 10)]
    pub producer_shutdown_secs: u64,

    /// Seconds the writer gets to drain and flush on shutdown
    #[arg(long, default_value_t = 30)]
    pub writer_shutdown_secs: u64,
}

/// Invalid combination of options.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be a non-negative number of seconds, got {value}")]
    BadSeconds { name: &'static str, value: f64 },
    #[error("start page {start} is after end page {end}")]
    PageRange { start: u32, end: u32 },
    #[error("round sleep minimum {min}s is above maximum {max}s")]
    RoundSleepRange { min: u64, max: u64 },
    #[error("at least one section is required")]
    NoSections,
}

impl Cli {
    /// The subcommand to run; `run` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Reject option combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue capacity"));
        }
        if p.batch_size == 0 {
            return Err(ConfigError::Zero("batch size"));
        }
        seconds("batch timeout", p.batch_timeout_secs)?;
        seconds("producer sleep", p.producer_sleep_secs)?;
        if p.start_page > p.end_page {
            return Err(ConfigError::PageRange {
                start: p.start_page,
                end: p.end_page,
            });
        }
        if p.round_sleep_min_secs > p.round_sleep_max_secs {
            return Err(ConfigError::RoundSleepRange {
                min: p.round_sleep_min_secs,
                max: p.round_sleep_max_secs,
            });
        }
        if p.sections().is_empty() {
            return Err(ConfigError::NoSections);
        }
        Ok(())
    }
}

impl PipelineArgs {
    /// Section names with blanks removed.
    pub fn sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn producer_config(&self) -> Result<ProducerConfig, ConfigError> {
        Ok(ProducerConfig {
            sections: self.sections(),
            start_page: self.start_page,
            end_page: self.end_page,
            min_content_chars: self.min_content_chars,
            classify_prefix_chars: self.classify_prefix_chars,
            pacing: seconds("producer sleep", self.producer_sleep_secs)?,
            round_sleep_min: Duration::from_secs(self.round_sleep_min_secs),
            round_sleep_max: Duration::from_secs(self.round_sleep_max_secs),
            ..ProducerConfig::default()
        })
    }

    pub fn writer_config(&self) -> Result<WriterConfig, ConfigError> {
        Ok(WriterConfig {
            batch_size: self.batch_size,
            batch_timeout: seconds("batch timeout", self.batch_timeout_secs)?,
            retry: RetryPolicy::default(),
            ..WriterConfig::default()
        })
    }

    pub fn shutdown_config(&self) -> ShutdownConfig {
        ShutdownConfig {
            producer_grace: Duration::from_secs(self.producer_shutdown_secs),
            writer_grace: Duration::from_secs(self.writer_shutdown_secs),
        }
    }

    pub fn classifier_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.classifier_model.clone(),
            temperature: self.classifier_temperature,
        }
    }

    pub fn summarizer_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.summarizer_model.clone(),
            temperature: self.summarizer_temperature,
        }
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::BadSeconds { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["current_affairs_ingest"]);

        assert_eq!(cli.command(), Command::Run);
        assert_eq!(cli.database_url, "sqlite://data/articles.db");
        assert_eq!(cli.pipeline.queue_capacity, 10_000);
        assert!(cli.validate().is_ok());

        let producer = cli.pipeline.producer_config().unwrap();
        assert_eq!(producer.sections.len(), 6);
        assert_eq!(producer.pacing, Duration::from_millis(200));
        assert_eq!((producer.start_page, producer.end_page), (1, 2));
        assert_eq!(producer.min_content_chars, 500);

        let writer = cli.pipeline.writer_config().unwrap();
        assert_eq!(writer.batch_size, 25);
        assert_eq!(writer.batch_timeout, Duration::from_secs(3));

        assert_eq!(cli.pipeline.shutdown_config(), ShutdownConfig::default());
    }

    #[test]
    fn test_cli_subcommands() {
        let cli = Cli::parse_from(["current_affairs_ingest", "list", "--limit", "5"]);
        assert_eq!(cli.command(), Command::List { limit: 5 });

        let cli = Cli::parse_from([
            "current_affairs_ingest",
            "show",
            "42",
            "--database-url",
            "sqlite://other.db",
        ]);
        assert_eq!(
            cli.command(),
            Command::Show {
                article: "42".to_string()
            }
        );
        assert_eq!(cli.database_url, "sqlite://other.db");
    }

    #[test]
    fn test_cli_sections_are_comma_separated() {
        let cli = Cli::parse_from(["current_affairs_ingest", "--sections", "WORLD, ,TECH"]);

        assert_eq!(cli.pipeline.sections(), vec!["WORLD", "TECH"]);
    }

    #[test]
    fn test_cli_validation() {
        let cli = Cli::parse_from(["current_affairs_ingest", "--batch-size", "0"]);
        assert_eq!(cli.validate(), Err(ConfigError::Zero("batch size")));

        let cli = Cli::parse_from([
            "current_affairs_ingest",
            "--start-page",
            "3",
            "--end-page",
            "2",
        ]);
        assert_eq!(
            cli.validate(),
            Err(ConfigError::PageRange { start: 3, end: 2 })
        );

        let cli = Cli::parse_from(["current_affairs_ingest", "--round-sleep-min-secs", "100"]);
        assert_eq!(
            cli.validate(),
            Err(ConfigError::RoundSleepRange { min: 100, max: 90 })
        );

        let cli = Cli::parse_from(["current_affairs_ingest", "--producer-sleep-secs=-1"]);
        assert!(matches!(
            cli.validate(),
            Err(ConfigError::BadSeconds { name: "producer sleep", .. })
        ));
    }
}
