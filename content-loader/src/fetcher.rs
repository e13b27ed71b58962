use crate::types::{FetchConfig, LoaderError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::header::COOKIE;
use reqwest::{Client, Method, RequestBuilder, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use url::Url;

/// The network seam used by every spout and by the media cache.
#[async_trait]
pub trait WebClient: Send + Sync {
    /// GET a text document. Non-success statuses are errors.
    /// `cookie` is sent verbatim as the `Cookie` header.
    async fn get_text(&self, url: &str, cookie: Option<&str>) -> Result<String>;

    /// GET a binary body (images). Non-success statuses are errors.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;

    /// Issue a HEAD request and report the status code only.
    async fn head_status(&self, url: &str, cookie: Option<&str>) -> Result<u16>;

    /// POST a urlencoded form and return the response body.
    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String>;
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn request(&self, method: Method, url: &str, cookie: Option<&str>) -> RequestBuilder {
        let mut request = self.client.request(method, url);

        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        request
    }

    /// GET with retries. Transport errors and non-success statuses are retried
    /// with exponential backoff, except 4xx which will not change on retry.
    async fn get_with_retries(&self, url: &str, cookie: Option<&str>) -> Result<Response> {
        self.apply_rate_limit(url).await?;

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.request(Method::GET, url, cookie).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        self.check_size(&response)?;
                        return Ok(response);
                    }

                    last_error = Some(LoaderError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });

                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(LoaderError::Http(e));
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }
            break;
        }

        error!("Failed to fetch {} after {} attempts", url, self.config.max_retries + 1);
        Err(last_error.unwrap_or_else(|| LoaderError::General(format!("Failed to fetch {}", url))))
    }

    fn check_size(&self, response: &Response) -> Result<()> {
        if let Some(content_length) = response.content_length() {
            let size_mb = content_length as usize / (1024 * 1024);
            if size_mb > self.config.max_body_size_mb {
                return Err(LoaderError::TooLarge { size_mb });
            }
        }
        Ok(())
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        if self.config.host_interval_ms == 0 {
            return Ok(());
        }

        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = Duration::from_millis(self.config.host_interval_ms);

        let mut rate_limiter = self.rate_limiter.write().await;

        if let Some(last_request) = rate_limiter.get(&host) {
            let elapsed = last_request.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        rate_limiter.insert(host, Instant::now());
        Ok(())
    }
}

#[async_trait]
impl WebClient for Fetcher {
    async fn get_text(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        debug!("Fetching document: {}", url);
        let response = self.get_with_retries(url, cookie).await?;
        let content = response.text().await?;
        debug!("Fetched {} ({} bytes)", url, content.len());
        Ok(content)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching binary: {}", url);
        let response = self.get_with_retries(url, None).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn head_status(&self, url: &str, cookie: Option<&str>) -> Result<u16> {
        self.apply_rate_limit(url).await?;
        let response = self.request(Method::HEAD, url, cookie).send().await?;
        Ok(response.status().as_u16())
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        self.apply_rate_limit(url).await?;

        let response = self.request(Method::POST, url, None).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
