use crate::fetcher::WebClient;
use crate::parser::FeedParser;
use crate::sources::check_params;
use crate::traits::{ItemCursor, Spout, SpoutItem};
use crate::types::{LoaderError, ParamKind, ParamSpec, ParsedEntry, Result, SpoutParams, Validation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub const FEED_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "url",
    title: "URL",
    kind: ParamKind::Url,
    default: "",
    required: true,
    validation: &[Validation::NotEmpty, Validation::Url],
}];

/// Generic RSS/Atom/JSON feed source.
pub struct FeedSpout {
    client: Arc<dyn WebClient>,
    title: Option<String>,
    items: Vec<FeedItem>,
}

impl FeedSpout {
    pub fn new(client: Arc<dyn WebClient>) -> Self {
        Self {
            client,
            title: None,
            items: Vec::new(),
        }
    }

    /// Fetches and parses `url`, replacing anything loaded before.
    pub(crate) async fn load_url(&mut self, url: &str) -> Result<()> {
        self.dispose();
        info!("Pulling feed: {}", url);

        let content = self.client.get_text(url, None).await?;
        if content.trim().is_empty() {
            warn!("No content returned for feed {}", url);
            return Err(LoaderError::Parse(format!("empty document at {}", url)));
        }

        let parsed = FeedParser::new().parse_feed(&content)?;
        let icon = parsed.icon.clone();

        self.title = parsed.title.filter(|title| !title.trim().is_empty());
        self.items = parsed
            .entries
            .into_iter()
            .map(|entry| FeedItem {
                entry,
                icon: icon.clone(),
            })
            .collect();

        info!("Loaded {} items from feed {}", self.items.len(), url);
        Ok(())
    }

    pub(crate) fn take_items(&mut self) -> Vec<FeedItem> {
        std::mem::take(&mut self.items)
    }
}

#[async_trait]
impl Spout for FeedSpout {
    fn spout_type(&self) -> &'static str {
        "rss"
    }

    fn name(&self) -> &'static str {
        "RSS Feed"
    }

    fn description(&self) -> &'static str {
        "Get posts from a plain RSS, Atom or JSON feed."
    }

    fn params(&self) -> &'static [ParamSpec] {
        FEED_PARAMS
    }

    async fn load(&mut self, params: &SpoutParams) -> Result<()> {
        let params = check_params(FEED_PARAMS, params)?;
        let url = params.get("url").map(|url| url.trim().to_string()).unwrap_or_default();
        self.load_url(&url).await
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn cursor(&mut self) -> ItemCursor {
        ItemCursor::new(
            self.take_items()
                .into_iter()
                .map(|item| Box::new(item) as Box<dyn SpoutItem>)
                .collect(),
        )
    }

    fn dispose(&mut self) {
        self.title = None;
        self.items.clear();
    }
}

/// One feed entry together with the feed-level icon.
pub struct FeedItem {
    entry: ParsedEntry,
    icon: Option<String>,
}

impl FeedItem {
    pub(crate) fn link_url(&self) -> &str {
        &self.entry.url
    }

    pub(crate) fn raw_content(&self) -> &str {
        self.entry.content.as_deref().unwrap_or("")
    }
}

#[async_trait]
impl SpoutItem for FeedItem {
    fn id(&self) -> &str {
        &self.entry.guid
    }

    fn title(&self) -> &str {
        &self.entry.title
    }

    fn author(&self) -> Option<&str> {
        self.entry.author.as_deref()
    }

    fn thumbnail(&self) -> Option<&str> {
        self.entry.thumbnail.as_deref()
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        self.entry.published_at
    }

    async fn link(&self) -> Result<String> {
        Ok(self.entry.url.clone())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.raw_content().to_string())
    }

    async fn icon(&self) -> Result<Option<String>> {
        Ok(self.icon.clone())
    }
}
