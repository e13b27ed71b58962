pub mod extract;
pub mod feed;
pub mod readability;
pub mod reddit;

pub use feed::FeedSpout;
pub use readability::ReadabilitySpout;
pub use reddit::RedditSpout;

use crate::fetcher::WebClient;
use crate::session_cache::SessionCache;
use crate::traits::Spout;
use crate::types::{LoaderError, ParamSpec, Result, SpoutParams};
use serde::Serialize;
use std::sync::Arc;

/// Fills in schema defaults for absent or blank parameters, then validates
/// the resulting bag. Returns the effective parameters.
pub fn check_params(specs: &[ParamSpec], params: &SpoutParams) -> Result<SpoutParams> {
    let mut effective = params.clone();
    for spec in specs {
        let blank = effective.get(spec.name).map_or(true, |value| value.trim().is_empty());
        if blank && !spec.default.is_empty() {
            effective.insert(spec.name.to_string(), spec.default.to_string());
        }
    }

    interfaces::validate_params(specs, &effective).map_err(|errors| LoaderError::InvalidParams(errors.join("; ")))?;
    Ok(effective)
}

/// Listing entry for one registered spout type.
#[derive(Debug, Clone, Serialize)]
pub struct SpoutInfo {
    pub spout_type: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

const SPOUT_TYPES: &[&str] = &["rss", "rss_readability", "reddit"];

/// Closed set of spout types, keyed by the identifier stored on sources.
pub struct SpoutRegistry {
    client: Arc<dyn WebClient>,
    sessions: Arc<SessionCache>,
    readability_key: Option<String>,
}

impl SpoutRegistry {
    pub fn new(client: Arc<dyn WebClient>, sessions: Arc<SessionCache>, readability_key: Option<String>) -> Self {
        Self {
            client,
            sessions,
            readability_key,
        }
    }

    /// A fresh spout instance for `spout_type`, or `None` if the type is unknown.
    pub fn create(&self, spout_type: &str) -> Option<Box<dyn Spout>> {
        match spout_type {
            "rss" => Some(Box::new(FeedSpout::new(self.client.clone()))),
            "rss_readability" => Some(Box::new(ReadabilitySpout::new(
                self.client.clone(),
                self.readability_key.clone(),
            ))),
            "reddit" => Some(Box::new(RedditSpout::new(
                self.client.clone(),
                self.sessions.clone(),
                self.readability_key.clone(),
            ))),
            _ => None,
        }
    }

    pub fn available(&self) -> Vec<SpoutInfo> {
        SPOUT_TYPES
            .iter()
            .filter_map(|spout_type| self.create(spout_type))
            .map(|spout| SpoutInfo {
                spout_type: spout.spout_type(),
                name: spout.name(),
                description: spout.description(),
                params: spout.params(),
            })
            .collect()
    }
}
