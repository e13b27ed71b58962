//! Thumbnail and icon cache.
//!
//! Files are named after a hash of the URL they were downloaded from, so the
//! same URL always maps to the same file no matter which source reported it.

use crate::fetcher::WebClient;
use crate::types::{LoaderError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const THUMBNAIL_EXTENSION: &str = "jpg";
pub const ICON_EXTENSION: &str = "png";

const THUMBNAIL_MAX_SIDE: u32 = 500;
const ICON_WIDTH: u32 = 30;

/// Cache file name for `url`: hex SHA-256 of the URL plus `extension`.
pub fn cache_key(url: &str, extension: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{}.{}", hex::encode(hasher.finalize()), extension)
}

/// Remembers the last icon processed during one source fetch.
/// Feeds usually report the same site icon for every item.
#[derive(Debug, Default)]
pub struct IconMemo {
    last: Option<(String, String)>,
}

impl IconMemo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, url: &str) -> Option<&str> {
        match &self.last {
            Some((last_url, key)) if last_url == url => Some(key),
            _ => None,
        }
    }

    fn remember(&mut self, url: &str, key: &str) {
        self.last = Some((url.to_string(), key.to_string()));
    }
}

pub struct MediaCache {
    client: Arc<dyn WebClient>,
    thumbnails_dir: PathBuf,
    favicons_dir: PathBuf,
}

impl MediaCache {
    pub fn new(client: Arc<dyn WebClient>, thumbnails_dir: PathBuf, favicons_dir: PathBuf) -> Self {
        Self {
            client,
            thumbnails_dir,
            favicons_dir,
        }
    }

    pub fn thumbnails_dir(&self) -> &Path {
        &self.thumbnails_dir
    }

    pub fn favicons_dir(&self) -> &Path {
        &self.favicons_dir
    }

    /// Downloads `url`, fits it into 500x500 and stores it as JPEG.
    /// Returns the cache key, or `None` (logged) on any failure.
    pub async fn fetch_thumbnail(&self, url: &str) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        let key = cache_key(url, THUMBNAIL_EXTENSION);
        match self.store(url, &self.thumbnails_dir, &key, Resize::Fit(THUMBNAIL_MAX_SIDE), ImageFormat::Jpeg).await {
            Ok(()) => {
                debug!("Thumbnail generated: {}", url);
                Some(key)
            }
            Err(e) => {
                error!("thumbnail generation error: {} ({})", url, e);
                None
            }
        }
    }

    /// Downloads `url`, scales it to a 30px width and stores it as PNG.
    /// An icon equal to the memoized one reuses its key without a download.
    pub async fn fetch_icon(&self, url: &str, memo: &mut IconMemo) -> Option<String> {
        let url = url.trim();
        if url.is_empty() {
            debug!("no icon for this item");
            return None;
        }

        if let Some(key) = memo.lookup(url) {
            debug!("use last icon: {}", url);
            return Some(key.to_string());
        }

        let key = cache_key(url, ICON_EXTENSION);
        match self.store(url, &self.favicons_dir, &key, Resize::Width(ICON_WIDTH), ImageFormat::Png).await {
            Ok(()) => {
                debug!("Icon generated: {}", url);
                memo.remember(url, &key);
                Some(key)
            }
            Err(e) => {
                error!("icon generation error: {} ({})", url, e);
                None
            }
        }
    }

    async fn store(&self, url: &str, dir: &Path, key: &str, resize: Resize, format: ImageFormat) -> Result<()> {
        let bytes = self.client.get_bytes(url).await?;
        let encoded = transcode(&bytes, resize, format)?;

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(key);
        if let Err(e) = tokio::fs::write(&path, encoded).await {
            warn!("Unable to store {}: check permissions of {}", url, dir.display());
            return Err(LoaderError::Io(e));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Resize {
    /// Fit inside a square of this side, never enlarging.
    Fit(u32),
    /// Scale to this width, height follows the aspect ratio.
    Width(u32),
}

fn transcode(bytes: &[u8], resize: Resize, format: ImageFormat) -> Result<Vec<u8>> {
    let image = image::load_from_memory(bytes)?;

    let resized = match resize {
        Resize::Fit(side) if image.width() > side || image.height() > side => {
            image.resize(side, side, FilterType::Lanczos3)
        }
        Resize::Fit(_) => image,
        Resize::Width(width) => image.resize(width, u32::MAX, FilterType::Lanczos3),
    };

    // JPEG has no alpha channel
    let resized = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };

    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, format)?;
    Ok(out.into_inner())
}
