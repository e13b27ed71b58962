use crate::fetcher::WebClient;
use crate::sources::extract::extract_readability;
use crate::sources::feed::{FeedItem, FeedSpout};
use crate::sources::check_params;
use crate::traits::{ItemCursor, Spout, SpoutItem};
use crate::types::{ParamKind, ParamSpec, Result, SpoutParams, Validation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

pub const READABILITY_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "url",
        title: "URL",
        kind: ParamKind::Url,
        default: "",
        required: true,
        validation: &[Validation::NotEmpty, Validation::Url],
    },
    ParamSpec {
        name: "api",
        title: "Readability API key",
        kind: ParamKind::Text,
        default: "",
        required: false,
        validation: &[],
    },
];

const PARSE_ERROR_BANNER: &str = "readability parse error <br />";

/// Feed source whose item bodies come from the readability parser
/// instead of the (often truncated) feed content.
pub struct ReadabilitySpout {
    inner: FeedSpout,
    client: Arc<dyn WebClient>,
    default_key: Option<String>,
    api_key: Option<String>,
}

impl ReadabilitySpout {
    pub fn new(client: Arc<dyn WebClient>, default_key: Option<String>) -> Self {
        Self {
            inner: FeedSpout::new(client.clone()),
            client,
            default_key,
            api_key: None,
        }
    }
}

#[async_trait]
impl Spout for ReadabilitySpout {
    fn spout_type(&self) -> &'static str {
        "rss_readability"
    }

    fn name(&self) -> &'static str {
        "RSS Feed (with readability)"
    }

    fn description(&self) -> &'static str {
        "A feed whose full article text is fetched through the readability parser."
    }

    fn params(&self) -> &'static [ParamSpec] {
        READABILITY_PARAMS
    }

    async fn load(&mut self, params: &SpoutParams) -> Result<()> {
        let params = check_params(READABILITY_PARAMS, params)?;

        self.api_key = params
            .get("api")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .or_else(|| self.default_key.clone());

        let url = params.get("url").map(|url| url.trim().to_string()).unwrap_or_default();
        self.inner.load_url(&url).await
    }

    fn title(&self) -> Option<String> {
        self.inner.title()
    }

    fn cursor(&mut self) -> ItemCursor {
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        ItemCursor::new(
            self.inner
                .take_items()
                .into_iter()
                .map(|inner| {
                    Box::new(ReadabilityItem {
                        inner,
                        client: client.clone(),
                        api_key: api_key.clone(),
                    }) as Box<dyn SpoutItem>
                })
                .collect(),
        )
    }

    fn dispose(&mut self) {
        self.inner.dispose();
        self.api_key = None;
    }
}

pub struct ReadabilityItem {
    inner: FeedItem,
    client: Arc<dyn WebClient>,
    api_key: Option<String>,
}

impl ReadabilityItem {
    async fn extracted(&self) -> Option<String> {
        let key = self.api_key.as_deref()?;
        let link = self.inner.link_url();
        if link.is_empty() {
            return None;
        }

        match extract_readability(self.client.as_ref(), key, link).await {
            Ok(content) => content,
            Err(e) => {
                warn!("readability failed for {}: {}", link, e);
                None
            }
        }
    }
}

#[async_trait]
impl SpoutItem for ReadabilityItem {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn title(&self) -> &str {
        self.inner.title()
    }

    fn author(&self) -> Option<&str> {
        self.inner.author()
    }

    fn thumbnail(&self) -> Option<&str> {
        self.inner.thumbnail()
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        self.inner.date()
    }

    async fn link(&self) -> Result<String> {
        self.inner.link().await
    }

    async fn content(&self) -> Result<String> {
        match self.extracted().await {
            Some(content) => Ok(content),
            None => {
                debug!("falling back to feed content for {}", self.inner.link_url());
                Ok(format!("{}{}", PARSE_ERROR_BANNER, self.inner.raw_content()))
            }
        }
    }

    async fn icon(&self) -> Result<Option<String>> {
        self.inner.icon().await
    }
}
