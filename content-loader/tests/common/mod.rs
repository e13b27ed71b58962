#![allow(dead_code)]

use async_trait::async_trait;
use content_loader::{
    ContentLoader, LoaderConfig, LoaderError, NewSource, Result, SourceId, SpoutParams, SqliteStore, WebClient,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// In-memory web: canned responses keyed by exact URL, with hit counting.
#[derive(Default)]
pub struct FakeWeb {
    pages: Mutex<HashMap<String, String>>,
    binaries: Mutex<HashMap<String, Vec<u8>>>,
    heads: Mutex<HashMap<String, u16>>,
    forms: Mutex<HashMap<String, String>>,
    hits: Mutex<HashMap<String, usize>>,
    cookies: Mutex<HashMap<String, Option<String>>>,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, url: &str, body: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), body.to_string());
    }

    pub fn binary(&self, url: &str, body: Vec<u8>) {
        self.binaries.lock().unwrap().insert(url.to_string(), body);
    }

    pub fn head(&self, url: &str, status: u16) {
        self.heads.lock().unwrap().insert(url.to_string(), status);
    }

    pub fn form(&self, url: &str, body: &str) {
        self.forms.lock().unwrap().insert(url.to_string(), body.to_string());
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// Cookie sent with the most recent GET of `url`.
    pub fn cookie_for(&self, url: &str) -> Option<String> {
        self.cookies.lock().unwrap().get(url).cloned().flatten()
    }

    fn hit(&self, url: &str) {
        *self.hits.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
    }

    fn not_found(url: &str) -> LoaderError {
        LoaderError::HttpStatus {
            url: url.to_string(),
            status: 404,
        }
    }
}

#[async_trait]
impl WebClient for FakeWeb {
    async fn get_text(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        self.hit(url);
        self.cookies
            .lock()
            .unwrap()
            .insert(url.to_string(), cookie.map(str::to_string));
        self.pages.lock().unwrap().get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.hit(url);
        self.binaries.lock().unwrap().get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn head_status(&self, url: &str, _cookie: Option<&str>) -> Result<u16> {
        self.hit(url);
        Ok(self.heads.lock().unwrap().get(url).copied().unwrap_or(200))
    }

    async fn post_form(&self, url: &str, _form: &[(&str, &str)]) -> Result<String> {
        self.hit(url);
        self.forms.lock().unwrap().get(url).cloned().ok_or_else(|| Self::not_found(url))
    }
}

pub struct Harness {
    pub loader: ContentLoader,
    pub store: Arc<SqliteStore>,
    pub web: Arc<FakeWeb>,
    pub data_dir: TempDir,
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(adjust: impl FnOnce(&mut LoaderConfig)) -> Harness {
    init_tracing();

    let data_dir = TempDir::new().unwrap();
    let mut config = LoaderConfig {
        data_dir: data_dir.path().to_path_buf(),
        ..LoaderConfig::default()
    };
    adjust(&mut config);

    let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
    let web = FakeWeb::new();
    let client: Arc<dyn WebClient> = web.clone();
    let loader = ContentLoader::new(config, client, store.clone());

    Harness {
        loader,
        store,
        web,
        data_dir,
    }
}

impl Harness {
    pub async fn add_source(&self, spout: &str, params: &[(&str, &str)], filter: Option<&str>) -> SourceId {
        self.store
            .add_source(&NewSource {
                title: format!("{} source", spout),
                tags: vec!["test".to_string()],
                spout: spout.to_string(),
                params: params
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect::<SpoutParams>(),
                filter: filter.map(str::to_string),
            })
            .await
            .unwrap()
    }
}

pub struct Entry<'a> {
    pub guid: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub pub_date: Option<&'a str>,
}

impl<'a> Entry<'a> {
    pub fn new(guid: &'a str, title: &'a str) -> Self {
        Self {
            guid,
            title,
            body: "",
            pub_date: None,
        }
    }

    pub fn body(mut self, body: &'a str) -> Self {
        self.body = body;
        self
    }

    pub fn published(mut self, date: &'a str) -> Self {
        self.pub_date = Some(date);
        self
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// RSS 2.0 document for a site at `site_link`; entry links are `<site_link><guid>`.
pub fn rss(title: &str, site_link: &str, entries: &[Entry]) -> String {
    let items: String = entries
        .iter()
        .map(|entry| {
            let date = entry
                .pub_date
                .map(|date| format!("<pubDate>{}</pubDate>", date))
                .unwrap_or_default();
            format!(
                "<item><guid>{guid}</guid><title>{title}</title><link>{site}{guid}</link><description>{body}</description>{date}</item>",
                guid = entry.guid,
                title = escape(entry.title),
                site = site_link,
                body = escape(entry.body),
                date = date,
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{}</title><link>{}</link><description>test</description>{}</channel></rss>"#,
        escape(title),
        site_link,
        items
    )
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([20, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn rfc2822_now() -> String {
    chrono::Utc::now().to_rfc2822()
}
