use crate::types::{LoaderError, ParsedEntry, ParsedFeed, Result};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Decodes RSS, Atom and JSON feeds. A parser instance remembers the ids it
/// has produced, so one document never yields the same entry twice.
pub struct FeedParser {
    seen_guids: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_guids: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| LoaderError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let site_link = feed
            .links
            .iter()
            .find(|link| link.rel.as_deref() != Some("self"))
            .map(|link| link.href.clone());

        let icon = feed
            .icon
            .map(|image| image.uri)
            .or_else(|| feed.logo.map(|image| image.uri))
            .filter(|uri| is_http_url(uri))
            .or_else(|| site_link.as_deref().and_then(favicon_url));

        let mut entries = Vec::new();
        for entry in feed.entries {
            if let Some(parsed_entry) = self.parse_entry(entry) {
                entries.push(parsed_entry);
            }
        }

        debug!("Parsed feed with {} entries", entries.len());

        Ok(ParsedFeed {
            title,
            icon,
            entries,
        })
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let title = entry.title.map(|t| t.content).unwrap_or_default();

        let url = entry
            .links
            .iter()
            .find(|link| link.rel.as_deref().map_or(true, |rel| rel == "alternate"))
            .or_else(|| entry.links.first())
            .map(|link| link.href.clone())
            .unwrap_or_default();

        let guid = if !entry.id.is_empty() {
            entry.id.clone()
        } else if !url.is_empty() {
            url.clone()
        } else {
            title.clone()
        };

        if !self.seen_guids.insert(guid.clone()) {
            debug!("Skipping duplicate entry with GUID: {}", guid);
            return None;
        }

        // Prefer the full content body over the summary
        let content = entry
            .content
            .and_then(|content_data| content_data.body)
            .or_else(|| entry.summary.map(|s| s.content));

        let author = entry.authors.first().map(|a| a.name.clone()).filter(|name| !name.trim().is_empty());

        let thumbnail = entry
            .media
            .iter()
            .flat_map(|media| media.thumbnails.iter())
            .map(|thumbnail| thumbnail.image.uri.clone())
            .find(|uri| is_http_url(uri));

        let published_at = entry.published.or(entry.updated);

        Some(ParsedEntry {
            guid,
            url,
            title,
            content,
            author,
            thumbnail,
            published_at,
        })
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// `<scheme>://<host>/favicon.ico` for the host of `page_url`.
pub(crate) fn favicon_url(page_url: &str) -> Option<String> {
    let parsed = Url::parse(page_url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let port = parsed.port().map(|port| format!(":{}", port)).unwrap_or_default();
    Some(format!("{}://{}{}/favicon.ico", parsed.scheme(), host, port))
}
