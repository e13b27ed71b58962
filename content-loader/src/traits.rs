use crate::types::{ParamSpec, Result, SpoutParams};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A source adapter. One instance serves one source for one fetch:
/// `load`, drain `cursor`, then `dispose`.
#[async_trait]
pub trait Spout: Send + Sync {
    /// Adapter-type identifier stored on sources.
    fn spout_type(&self) -> &'static str;

    /// Human-readable name for this adapter
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Configuration schema the source params are validated against.
    fn params(&self) -> &'static [ParamSpec];

    /// Reach the remote source and buffer its current items.
    async fn load(&mut self, params: &SpoutParams) -> Result<()>;

    /// Title the remote source gives itself, available after `load`.
    fn title(&self) -> Option<String>;

    /// Hands out the loaded items. The cursor is single-pass; calling this
    /// again without a new `load` yields nothing.
    fn cursor(&mut self) -> ItemCursor;

    /// Drops any buffered documents and items.
    fn dispose(&mut self);
}

/// Read-only view of one remote item. Fields that may need extra network work
/// are async and resolved on demand.
#[async_trait]
pub trait SpoutItem: Send + Sync {
    fn id(&self) -> &str;

    fn title(&self) -> &str;

    fn author(&self) -> Option<&str>;

    fn thumbnail(&self) -> Option<&str>;

    /// Publication time, `None` when missing or unparsable.
    fn date(&self) -> Option<DateTime<Utc>>;

    async fn link(&self) -> Result<String>;

    async fn content(&self) -> Result<String>;

    async fn icon(&self) -> Result<Option<String>>;
}

pub struct ItemCursor {
    items: std::vec::IntoIter<Box<dyn SpoutItem>>,
}

impl ItemCursor {
    pub fn new(items: Vec<Box<dyn SpoutItem>>) -> Self {
        Self { items: items.into_iter() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for ItemCursor {
    type Item = Box<dyn SpoutItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}
