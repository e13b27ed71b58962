use crate::fetcher::WebClient;
use crate::parser::{favicon_url, is_http_url};
use crate::session_cache::SessionCache;
use crate::sources::check_params;
use crate::sources::extract::{extract_instapaper, extract_readability, first_image_src};
use crate::traits::{ItemCursor, Spout, SpoutItem};
use crate::types::{LoaderError, ParamKind, ParamSpec, Result, SpoutParams, Validation};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const REDDIT_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "url",
        title: "Subreddit or multireddit url",
        kind: ParamKind::Text,
        default: "r/worldnews/top",
        required: true,
        validation: &[Validation::NotEmpty],
    },
    ParamSpec {
        name: "username",
        title: "Username",
        kind: ParamKind::Text,
        default: "",
        required: false,
        validation: &[],
    },
    ParamSpec {
        name: "password",
        title: "Password",
        kind: ParamKind::Password,
        default: "",
        required: false,
        validation: &[],
    },
];

const LISTING_BASE: &str = "https://www.reddit.com";
const LOGIN_BASE: &str = "https://ssl.reddit.com/api/login";

fn image_host() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"imgur").expect("valid regex"))
}

fn image_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(?:gif|jpg|png|svg)$").expect("valid regex"))
}

fn image_anywhere() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(?:gif|jpg|png|svg)").expect("valid regex"))
}

fn embed_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)embed$").expect("valid regex"))
}

fn small_thumbnail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"s\.(jpg|jpeg|png|gif)$").expect("valid regex"))
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ListingData>,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Debug, Clone, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    selftext_html: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    json: LoginBody,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    cookie: String,
}

/// Link posts of a subreddit or multireddit listing.
pub struct RedditSpout {
    client: Arc<dyn WebClient>,
    sessions: Arc<SessionCache>,
    readability_key: Option<String>,
    session: Option<String>,
    posts: Vec<Post>,
}

impl RedditSpout {
    pub fn new(client: Arc<dyn WebClient>, sessions: Arc<SessionCache>, readability_key: Option<String>) -> Self {
        Self {
            client,
            sessions,
            readability_key,
            session: None,
            posts: Vec::new(),
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        info!("Logging in to reddit as {}", username);

        let url = format!("{}/{}", LOGIN_BASE, username);
        let body = self
            .client
            .post_form(&url, &[("api_type", "json"), ("user", username), ("passwd", password)])
            .await?;

        let response: LoginResponse =
            serde_json::from_str(&body).map_err(|e| LoaderError::Authentication(format!("unexpected login response: {}", e)))?;

        if !response.json.errors.is_empty() {
            let reasons: Vec<String> = response
                .json
                .errors
                .iter()
                .map(|error| match error.get(1) {
                    Some(serde_json::Value::String(reason)) => reason.clone(),
                    Some(other) => other.to_string(),
                    None => "login rejected".to_string(),
                })
                .collect();
            return Err(LoaderError::Authentication(reasons.join("\n")));
        }

        response
            .json
            .data
            .map(|data| data.cookie)
            .filter(|cookie| !cookie.is_empty())
            .ok_or_else(|| LoaderError::Authentication("login returned no session".to_string()))
    }

    async fn session_for(&self, username: &str, password: &str) -> Result<String> {
        let key = format!("{}_reddit_session", username);
        if let Some(token) = self.sessions.get(&key) {
            debug!("Reusing reddit session for {}", username);
            return Ok(token);
        }

        let token = self.login(username, password).await?;
        self.sessions.insert(&key, &token);
        Ok(token)
    }
}

#[async_trait]
impl Spout for RedditSpout {
    fn spout_type(&self) -> &'static str {
        "reddit"
    }

    fn name(&self) -> &'static str {
        "Reddit"
    }

    fn description(&self) -> &'static str {
        "Get your fix from Reddit"
    }

    fn params(&self) -> &'static [ParamSpec] {
        REDDIT_PARAMS
    }

    async fn load(&mut self, params: &SpoutParams) -> Result<()> {
        self.dispose();
        let params = check_params(REDDIT_PARAMS, params)?;

        let username = params.get("username").map(|s| s.trim()).unwrap_or("");
        let password = params.get("password").map(String::as_str).unwrap_or("");
        if !username.is_empty() && !password.is_empty() {
            self.session = Some(self.session_for(username, password).await?);
        }

        let path = params.get("url").map(|s| s.trim().trim_matches('/')).unwrap_or("");
        let url = format!("{}/{}.json", LISTING_BASE, path);
        info!("Pulling reddit listing: {}", url);

        let body = self.client.get_text(&url, cookie_header(&self.session).as_deref()).await?;
        let listing: Listing = serde_json::from_str(&body)?;

        if listing.error.is_some() {
            let message = listing.message.unwrap_or_else(|| "reddit returned an error".to_string());
            return Err(LoaderError::General(message));
        }

        self.posts = listing
            .data
            .map(|data| data.children.into_iter().map(|child| child.data).collect())
            .unwrap_or_default();

        info!("Loaded {} posts from {}", self.posts.len(), url);
        Ok(())
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn cursor(&mut self) -> ItemCursor {
        let posts = std::mem::take(&mut self.posts);
        ItemCursor::new(
            posts
                .into_iter()
                .map(|post| {
                    Box::new(RedditItem {
                        post,
                        client: self.client.clone(),
                        cookie: cookie_header(&self.session),
                        readability_key: self.readability_key.clone(),
                        resolved: OnceCell::new(),
                    }) as Box<dyn SpoutItem>
                })
                .collect(),
        )
    }

    fn dispose(&mut self) {
        self.posts.clear();
        self.session = None;
    }
}

fn cookie_header(session: &Option<String>) -> Option<String> {
    session.as_ref().map(|token| format!("reddit_session={}", token))
}

pub struct RedditItem {
    post: Post,
    client: Arc<dyn WebClient>,
    cookie: Option<String>,
    readability_key: Option<String>,
    resolved: OnceCell<String>,
}

impl RedditItem {
    /// Image-host pages without an extension are probed once: a direct `.jpg`
    /// if it exists, the embed page otherwise.
    async fn resolve_link(&self) -> String {
        let url = self.post.url.trim();
        if !image_host().is_match(url) || image_suffix().is_match(url) {
            return url.to_string();
        }

        let direct = format!("{}.jpg", url);
        match self.client.head_status(&direct, self.cookie.as_deref()).await {
            Ok(404) => format!("{}/embed", url),
            Ok(_) => direct,
            Err(e) => {
                warn!("image probe failed for {}: {}", direct, e);
                url.to_string()
            }
        }
    }

    async fn embedded_image(&self, link: &str) -> Result<Option<String>> {
        let page = self.client.get_text(link, self.cookie.as_deref()).await?;
        Ok(first_image_src(&page).map(|src| {
            let full_size = small_thumbnail().replace(&src, ".$1");
            format!(r#"<a href="{}"><img src="{}"/></a>"#, link, full_size)
        }))
    }

    async fn scraped(&self, link: &str) -> Option<String> {
        if let Some(key) = self.readability_key.as_deref() {
            match extract_readability(self.client.as_ref(), key, link).await {
                Ok(Some(content)) => return Some(content),
                Ok(None) => {}
                Err(e) => warn!("readability failed for {}: {}", link, e),
            }
        }

        match extract_instapaper(self.client.as_ref(), link).await {
            Ok(content) => content,
            Err(e) => {
                warn!("instapaper failed for {}: {}", link, e);
                None
            }
        }
    }
}

#[async_trait]
impl SpoutItem for RedditItem {
    fn id(&self) -> &str {
        &self.post.id
    }

    fn title(&self) -> &str {
        &self.post.title
    }

    fn author(&self) -> Option<&str> {
        self.post.author.as_deref()
    }

    fn thumbnail(&self) -> Option<&str> {
        self.post.thumbnail.as_deref().filter(|thumbnail| is_http_url(thumbnail))
    }

    fn date(&self) -> Option<DateTime<Utc>> {
        let created = self.post.created_utc?;
        Utc.timestamp_opt(created as i64, 0).single()
    }

    async fn link(&self) -> Result<String> {
        Ok(self.resolved.get_or_init(|| self.resolve_link()).await.clone())
    }

    async fn content(&self) -> Result<String> {
        if let Some(text) = self.post.selftext_html.as_deref() {
            if !text.trim().is_empty() {
                return Ok(text.to_string());
            }
        }

        let link = self.link().await?;

        if image_anywhere().is_match(&link) {
            return Ok(format!(r#"<img src="{}" />"#, link));
        }

        if embed_suffix().is_match(&link) {
            if let Some(content) = self.embedded_image(&link).await? {
                return Ok(content);
            }
        }

        if let Some(content) = self.scraped(&link).await {
            return Ok(content);
        }

        Ok(self.post.url.clone())
    }

    async fn icon(&self) -> Result<Option<String>> {
        let link = self.link().await?;
        Ok(favicon_url(&link))
    }
}
