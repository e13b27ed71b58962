use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SourceId = i64;
pub type ItemId = i64;

/// Adapter configuration bag, persisted as a JSON object.
pub type SpoutParams = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub title: String,
    pub tags: Vec<String>,
    pub spout: String,
    pub params: SpoutParams,
    pub filter: Option<String>,
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_entry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub title: String,
    pub tags: Vec<String>,
    pub spout: String,
    pub params: SpoutParams,
    pub filter: Option<String>,
}

/// An item ready to be stored. `thumbnail` and `icon` hold media cache keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub source_id: SourceId,
    pub uid: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub icon: Option<String>,
    pub published: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub source_id: SourceId,
    pub uid: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub icon: Option<String>,
    pub published: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Url,
    Password,
    Checkbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    NotEmpty,
    Url,
    Int,
}

/// One configurable parameter of an adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub kind: ParamKind,
    pub default: &'static str,
    pub required: bool,
    pub validation: &'static [Validation],
}

impl ParamSpec {
    /// Checks `value` against the required flag and validation rules.
    /// Returns a readable complaint for the first rule that fails.
    pub fn check(&self, value: Option<&str>) -> Result<(), String> {
        let value = value.map(str::trim).unwrap_or("");
        if value.is_empty() {
            if self.required {
                return Err(format!("{} is required", self.title));
            }
            return Ok(());
        }

        for rule in self.validation {
            match rule {
                Validation::NotEmpty => {}
                Validation::Url => {
                    let lower = value.to_ascii_lowercase();
                    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                        return Err(format!("{} must be an http(s) url", self.title));
                    }
                }
                Validation::Int => {
                    if value.parse::<i64>().is_err() {
                        return Err(format!("{} must be a number", self.title));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Validates a whole parameter bag against a schema, collecting every complaint.
pub fn validate_params(specs: &[ParamSpec], params: &SpoutParams) -> Result<(), Vec<String>> {
    let errors: Vec<String> = specs
        .iter()
        .filter_map(|spec| spec.check(params.get(spec.name).map(String::as_str)).err())
        .collect();

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
