//! Third-party content extraction services.

use crate::fetcher::WebClient;
use crate::types::{LoaderError, Result};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded::byte_serialize;

const READABILITY_ENDPOINT: &str = "https://readability.com/api/content/v1/parser";
const INSTAPAPER_ENDPOINT: &str = "https://www.instapaper.com/text";

#[derive(Debug, Deserialize)]
struct ReadabilityResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    messages: Option<String>,
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Asks the readability parser API for the article body behind `url`.
/// `Ok(None)` means the service answered without usable content.
pub async fn extract_readability(client: &dyn WebClient, api_key: &str, url: &str) -> Result<Option<String>> {
    let request = format!("{}?token={}&url={}", READABILITY_ENDPOINT, encode(api_key), encode(url));
    let body = client.get_text(&request, None).await?;

    let response: ReadabilityResponse = serde_json::from_str(&body)?;
    if response.error.unwrap_or(false) {
        let reason = response.messages.unwrap_or_else(|| "readability error".to_string());
        return Err(LoaderError::Parse(reason));
    }

    let content = response.content.filter(|content| !content.trim().is_empty());
    debug!("readability {} for {}", if content.is_some() { "succeeded" } else { "returned nothing" }, url);
    Ok(content)
}

/// Takes the text view instapaper renders for `url` and returns its story block.
pub async fn extract_instapaper(client: &dyn WebClient, url: &str) -> Result<Option<String>> {
    let request = format!("{}?u={}", INSTAPAPER_ENDPOINT, encode(url));
    let body = client.get_text(&request, None).await?;
    Ok(story_block(&body))
}

fn story_block(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = Selector::parse("div#story").ok()?;

    document
        .select(&selector)
        .next()
        .map(|story| story.html())
        .filter(|html| !html.trim().is_empty())
}

/// Source of the first `<img>` in an HTML page.
pub fn first_image_src(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = Selector::parse("img[src]").ok()?;

    document
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| !src.is_empty())
        .map(str::to_string)
}
