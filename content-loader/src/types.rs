use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

// Use the interfaces crate for the persisted model and storage contracts
pub use interfaces::defs::{Item, ItemId, NewItem, NewSource, ParamKind, ParamSpec, Source, SourceId, SpoutParams, Validation};
pub use interfaces::state::{ItemsRepository, SourcesRepository, StorageMaintenance};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_body_size_mb: usize,
    pub max_redirects: usize,
    /// Minimum pause between two requests to the same host, in milliseconds.
    pub host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Content-Loader/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_body_size_mb: 10,
            max_redirects: 5,
            host_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub fetch: FetchConfig,
    /// Retention window in days.
    pub items_lifetime_days: i64,
    /// Root of the `thumbnails/` and `favicons/` cache directories.
    pub data_dir: PathBuf,
    /// A source updated less than this many seconds ago is not fetched again.
    pub rate_guard_seconds: i64,
    pub source_timeout_seconds: u64,
    pub session_ttl_seconds: u64,
    /// Default key for the readability extraction service.
    pub readability_api_key: Option<String>,
    /// Localized label used as `[label]` for items without a title.
    pub no_title_label: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            items_lifetime_days: 30,
            data_dir: PathBuf::from("data"),
            rate_guard_seconds: 20,
            source_timeout_seconds: 5000,
            session_ttl_seconds: 3600,
            readability_api_key: None,
            no_title_label: "no title".to_string(),
        }
    }
}

impl LoaderConfig {
    /// Defaults overlaid with `LOADER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(days) = env_parse("LOADER_ITEMS_LIFETIME") {
            config.items_lifetime_days = days;
        }
        if let Ok(dir) = env::var("LOADER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(seconds) = env_parse("LOADER_RATE_GUARD_SECONDS") {
            config.rate_guard_seconds = seconds;
        }
        if let Some(seconds) = env_parse("LOADER_SOURCE_TIMEOUT_SECONDS") {
            config.source_timeout_seconds = seconds;
        }
        if let Ok(key) = env::var("LOADER_READABILITY_API_KEY") {
            if !key.trim().is_empty() {
                config.readability_api_key = Some(key);
            }
        }
        if let Ok(label) = env::var("LOADER_NO_TITLE_LABEL") {
            config.no_title_label = label;
        }
        if let Ok(agent) = env::var("LOADER_USER_AGENT") {
            config.fetch.user_agent = agent;
        }
        if let Some(seconds) = env_parse("LOADER_HTTP_TIMEOUT_SECONDS") {
            config.fetch.timeout_seconds = seconds;
        }

        config
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }

    pub fn favicons_dir(&self) -> PathBuf {
        self.data_dir.join("favicons")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub guid: String,
    pub url: String,
    pub title: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// What a single `fetch_source` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchOutcome {
    /// Updated too recently, nothing done.
    RateLimited,
    /// Another fetch of the same source is in progress.
    Busy,
    /// The adapter could not be loaded; the message was stored on the source.
    Failed(String),
    Fetched {
        inserted: usize,
        refreshed: usize,
        skipped: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub sources: usize,
    pub fetched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub items_removed: u64,
    pub thumbnails_removed: usize,
    pub icons_removed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Repository error: {0}")]
    Repository(#[from] anyhow::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unknown source: {id}")]
    SourceNotFound { id: SourceId },

    #[error("unknown spout: {0}")]
    UnknownSpout(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Response too large: {size_mb}MB")]
    TooLarge { size_mb: usize },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
