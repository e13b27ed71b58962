use crate::fetcher::WebClient;
use crate::filter;
use crate::media::{IconMemo, MediaCache};
use crate::parser::is_http_url;
use crate::sanitizer::{sanitize_content, sanitize_field};
use crate::session_cache::SessionCache;
use crate::sources::{SpoutInfo, SpoutRegistry};
use crate::traits::{Spout, SpoutItem};
use crate::types::{
    CleanupSummary, FetchOutcome, ItemsRepository, LoaderConfig, LoaderError, NewItem, Result, Source, SourceId,
    SourcesRepository, SpoutParams, StorageMaintenance, UpdateSummary,
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const MAX_UID_LENGTH: usize = 255;

/// Drives spouts and persists what they report.
pub struct ContentLoader {
    config: LoaderConfig,
    items: Arc<dyn ItemsRepository>,
    sources: Arc<dyn SourcesRepository>,
    maintenance: Arc<dyn StorageMaintenance>,
    registry: SpoutRegistry,
    media: MediaCache,
    leases: Mutex<HashSet<SourceId>>,
    // fetches hold the read side, cleanup the write side
    batch_gate: RwLock<()>,
}

impl ContentLoader {
    pub fn new<S>(config: LoaderConfig, client: Arc<dyn WebClient>, store: Arc<S>) -> Self
    where
        S: ItemsRepository + SourcesRepository + StorageMaintenance + 'static,
    {
        let sessions = Arc::new(SessionCache::new(config.session_ttl_seconds));
        let registry = SpoutRegistry::new(client.clone(), sessions, config.readability_api_key.clone());
        let media = MediaCache::new(client, config.thumbnails_dir(), config.favicons_dir());

        Self {
            items: store.clone(),
            sources: store.clone(),
            maintenance: store,
            registry,
            media,
            leases: Mutex::new(HashSet::new()),
            batch_gate: RwLock::new(()),
            config,
        }
    }

    /// Fetches every due source in order, then cleans up once.
    pub async fn update_all(&self) -> Result<UpdateSummary> {
        let sources = self.sources.get_due().await?;
        let mut summary = UpdateSummary {
            sources: sources.len(),
            ..Default::default()
        };

        info!("Updating {} sources", sources.len());

        for source in &sources {
            info!("updating source: {} id: {}", source.title, source.id);
            match self.fetch_source(source).await {
                Ok(FetchOutcome::Fetched { inserted, .. }) => {
                    summary.fetched += 1;
                    summary.inserted += inserted;
                }
                Ok(FetchOutcome::RateLimited) | Ok(FetchOutcome::Busy) => summary.skipped += 1,
                Ok(FetchOutcome::Failed(_)) => summary.failed += 1,
                Err(e) => {
                    error!("Failed to update source {} ({}): {}", source.title, source.id, e);
                    summary.failed += 1;
                }
            }
        }

        self.cleanup().await?;

        info!(
            "Updated {}/{} sources, {} new items",
            summary.fetched, summary.sources, summary.inserted
        );
        Ok(summary)
    }

    /// Fetches a single source by id, then cleans up.
    pub async fn update_one(&self, id: SourceId) -> Result<FetchOutcome> {
        let source = self
            .sources
            .get(id)
            .await?
            .ok_or(LoaderError::SourceNotFound { id })?;

        let outcome = self.fetch_source(&source).await?;
        self.cleanup().await?;
        Ok(outcome)
    }

    pub async fn fetch_source(&self, source: &Source) -> Result<FetchOutcome> {
        let _gate = self.batch_gate.read().await;

        let Some(_lease) = SourceLease::acquire(&self.leases, source.id) else {
            debug!("source {} is already being fetched", source.title);
            return Ok(FetchOutcome::Busy);
        };

        // the caller's snapshot may predate another fetch that finished meanwhile
        let stored = self
            .sources
            .get(source.id)
            .await?
            .ok_or(LoaderError::SourceNotFound { id: source.id })?;

        if let Some(last_update) = stored.last_update {
            let elapsed = Utc::now() - last_update;
            if elapsed < Duration::seconds(self.config.rate_guard_seconds) {
                debug!("source {} was updated {}s ago, skipping", source.title, elapsed.num_seconds());
                return Ok(FetchOutcome::RateLimited);
            }
        }

        let seconds = self.config.source_timeout_seconds;
        match tokio::time::timeout(std::time::Duration::from_secs(seconds), self.fetch_unguarded(source)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = LoaderError::Timeout { seconds }.to_string();
                error!("fetching {} aborted: {}", source.title, message);
                self.sources.set_error(source.id, Some(message.as_str())).await?;
                Ok(FetchOutcome::Failed(message))
            }
        }
    }

    async fn fetch_unguarded(&self, source: &Source) -> Result<FetchOutcome> {
        let Some(mut spout) = self.registry.create(&source.spout) else {
            let message = LoaderError::UnknownSpout(source.spout.clone()).to_string();
            error!("{} for source {}", message, source.title);
            self.sources.set_error(source.id, Some(message.as_str())).await?;
            return Ok(FetchOutcome::Failed(message));
        };

        let outcome = self.run_spout(source, spout.as_mut()).await;
        spout.dispose();
        outcome
    }

    async fn run_spout(&self, source: &Source, spout: &mut dyn Spout) -> Result<FetchOutcome> {
        if let Err(e) = spout.load(&source.params).await {
            let message = e.to_string();
            error!("error loading feed content for {}: {}", source.title, message);
            self.sources.set_error(source.id, Some(message.as_str())).await?;
            return Ok(FetchOutcome::Failed(message));
        }

        let items: Vec<Box<dyn SpoutItem>> = spout.cursor().collect();
        let uids: Vec<String> = items.iter().map(|item| stable_uid(item.id())).collect();
        let known = self.items.find_existing(&uids, source.id).await?;

        let now = Utc::now();
        let window_start = now - Duration::days(self.config.items_lifetime_days);
        let mut memo = IconMemo::new();
        let mut handled = HashSet::new();
        let mut seen = Vec::new();
        let mut inserted = 0;
        let mut skipped = 0;
        let mut last_entry: Option<DateTime<Utc>> = None;

        for (item, uid) in items.iter().zip(uids) {
            if let Some(id) = known.get(&uid) {
                seen.push(*id);
                continue;
            }
            if !handled.insert(uid.clone()) {
                continue;
            }

            let published = match item.date() {
                Some(date) if date.timestamp() != 0 => date.min(now),
                _ => now,
            };
            if published < window_start {
                debug!("item \"{}\" is older than the retention window", item.title());
                skipped += 1;
                continue;
            }

            let mut title = sanitize_field(item.title().trim());
            if title.trim().is_empty() {
                title = format!("[{}]", self.config.no_title_label);
            }

            let author = item
                .author()
                .map(|author| sanitize_field(author.trim()))
                .filter(|author| !author.is_empty());

            let content = match item.content().await {
                Ok(content) => sanitize_content(&content),
                Err(e) => {
                    error!("content of \"{}\" not fetched: {}", title, e);
                    sanitize_content(&format!("Error: Content not fetched. Reason: {}", e))
                }
            };

            if !filter::matches(source.filter.as_deref().unwrap_or(""), &title, &content) {
                debug!("item \"{}\" does not match the filter", title);
                skipped += 1;
                continue;
            }

            let link = match item.link().await {
                Ok(link) if is_http_url(link.trim()) => link.trim().to_string(),
                Ok(_) => String::new(),
                Err(e) => {
                    warn!("link of \"{}\" not resolved: {}", title, e);
                    String::new()
                }
            };

            let thumbnail = match item.thumbnail() {
                Some(url) => self.media.fetch_thumbnail(url).await,
                None => None,
            };

            let icon = match item.icon().await {
                Ok(Some(url)) => self.media.fetch_icon(&url, &mut memo).await,
                Ok(None) => None,
                Err(e) => {
                    warn!("icon of \"{}\" not resolved: {}", title, e);
                    None
                }
            };

            let new_item = NewItem {
                source_id: source.id,
                uid,
                title,
                content,
                link,
                author,
                thumbnail,
                icon,
                published,
            };

            self.items.add(&new_item).await?;
            debug!("item inserted: {}", new_item.title);
            inserted += 1;
            last_entry = Some(last_entry.map_or(published, |entry| entry.max(published)));
        }

        self.sources.set_error(source.id, None).await?;
        self.sources.save_last_update(source.id, last_entry).await?;
        self.items.refresh_last_seen(&seen).await?;

        info!(
            "source {}: {} new, {} seen again, {} skipped",
            source.title,
            inserted,
            seen.len(),
            skipped
        );

        Ok(FetchOutcome::Fetched {
            inserted,
            refreshed: seen.len(),
            skipped,
        })
    }

    /// Drops expired items and unreferenced media files, then compacts storage.
    pub async fn cleanup(&self) -> Result<CleanupSummary> {
        let _gate = self.batch_gate.write().await;

        let items_removed = self.items.cleanup(self.config.items_lifetime_days).await?;
        let thumbnails_removed = self.remove_orphans(self.media.thumbnails_dir(), MediaKind::Thumbnail).await?;
        let icons_removed = self.remove_orphans(self.media.favicons_dir(), MediaKind::Icon).await?;
        self.maintenance.optimize().await?;

        info!(
            "cleanup removed {} items, {} thumbnails, {} icons",
            items_removed, thumbnails_removed, icons_removed
        );

        Ok(CleanupSummary {
            items_removed,
            thumbnails_removed,
            icons_removed,
        })
    }

    async fn remove_orphans(&self, dir: &Path, kind: MediaKind) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".htaccess" {
                continue;
            }

            let referenced = match kind {
                MediaKind::Thumbnail => self.items.has_thumbnail(&name).await?,
                MediaKind::Icon => self.items.has_icon(&name).await?,
            };

            if !referenced {
                tokio::fs::remove_file(entry.path()).await?;
                debug!("removed unreferenced {:?} {}", kind, name);
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Title the remote source reports for itself, without storing anything.
    pub async fn fetch_title(&self, spout_type: &str, params: &SpoutParams) -> Option<String> {
        let Some(mut spout) = self.registry.create(spout_type) else {
            error!("unknown spout: {}", spout_type);
            return None;
        };

        let title = match spout.load(params).await {
            Ok(()) => spout.title(),
            Err(e) => {
                error!("failed to load {} for its title: {}", spout_type, e);
                None
            }
        };

        spout.dispose();
        title
    }

    pub fn available_spouts(&self) -> Vec<SpoutInfo> {
        self.registry.available()
    }
}

#[derive(Debug, Clone, Copy)]
enum MediaKind {
    Thumbnail,
    Icon,
}

/// Marks a source as being fetched until dropped.
struct SourceLease<'a> {
    leases: &'a Mutex<HashSet<SourceId>>,
    id: SourceId,
}

impl<'a> SourceLease<'a> {
    fn acquire(leases: &'a Mutex<HashSet<SourceId>>, id: SourceId) -> Option<Self> {
        let mut held = leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(id) {
            return None;
        }
        Some(Self { leases, id })
    }
}

impl Drop for SourceLease<'_> {
    fn drop(&mut self) {
        let mut held = self.leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.id);
    }
}

/// Item uid as stored: ids too long for the column are replaced by their digest.
pub fn stable_uid(id: &str) -> String {
    if id.len() <= MAX_UID_LENGTH {
        return id.to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uids_are_kept() {
        assert_eq!(stable_uid("t3_abc"), "t3_abc");
    }

    #[test]
    fn long_uids_are_digested_consistently() {
        let long = "x".repeat(300);
        let first = stable_uid(&long);
        assert_eq!(first.len(), 64);
        assert_eq!(first, stable_uid(&long));
    }

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let leases = Mutex::new(HashSet::new());
        let lease = SourceLease::acquire(&leases, 1).unwrap();
        assert!(SourceLease::acquire(&leases, 1).is_none());
        assert!(SourceLease::acquire(&leases, 2).is_some());
        drop(lease);
        assert!(SourceLease::acquire(&leases, 1).is_some());
    }
}
