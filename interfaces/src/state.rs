use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::defs::{ItemId, NewItem, Source, SourceId};

// Storage contracts consumed by the loader. Implementations are expected to be
// cheap to share behind an `Arc` and safe to call from one task at a time.

#[async_trait]
pub trait ItemsRepository: Send + Sync {
    /// Maps every uid in `uids` that is already stored for `source_id` to its item id.
    async fn find_existing(&self, uids: &[String], source_id: SourceId) -> Result<HashMap<String, ItemId>>;

    async fn add(&self, item: &NewItem) -> Result<ItemId>;

    /// Marks the given items as reported by their source right now.
    async fn refresh_last_seen(&self, item_ids: &[ItemId]) -> Result<()>;

    /// Deletes items not seen within the last `retention_days` days.
    /// Returns the number of removed rows.
    async fn cleanup(&self, retention_days: i64) -> Result<u64>;

    async fn has_thumbnail(&self, file_name: &str) -> Result<bool>;

    async fn has_icon(&self, file_name: &str) -> Result<bool>;
}

#[async_trait]
pub trait SourcesRepository: Send + Sync {
    /// Sources in refresh order, least recently updated first.
    async fn get_due(&self) -> Result<Vec<Source>>;

    async fn get(&self, id: SourceId) -> Result<Option<Source>>;

    /// Records (`Some`) or clears (`None`) the source's last error.
    async fn set_error(&self, id: SourceId, message: Option<&str>) -> Result<()>;

    /// Stamps the last update time. `last_entry` of `None` keeps the stored value,
    /// and a stored value is never moved backwards.
    async fn save_last_update(&self, id: SourceId, last_entry: Option<DateTime<Utc>>) -> Result<()>;
}

#[async_trait]
pub trait StorageMaintenance: Send + Sync {
    async fn optimize(&self) -> Result<()>;
}
