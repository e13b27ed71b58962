mod common;

use chrono::{Duration, Utc};
use common::{harness, harness_with, png_bytes, rfc2822_now, rss, Entry};
use content_loader::media::{cache_key, ICON_EXTENSION};
use content_loader::{FetchOutcome, LoaderError, SourcesRepository, SpoutParams};
use tracing::info;

const FEED_URL: &str = "https://site.example/feed.xml";
const SITE: &str = "https://site.example/";

#[tokio::test]
async fn known_items_are_refreshed_not_duplicated() {
    let h = harness_with(|config| config.rate_guard_seconds = 0).await;
    let now = rfc2822_now();
    h.web.page(
        FEED_URL,
        &rss("Site", SITE, &[Entry::new("a", "First").published(&now), Entry::new("b", "Second").published(&now)]),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let source = h.store.get(id).await.unwrap().unwrap();
    let first = h.loader.fetch_source(&source).await.unwrap();
    assert_eq!(first, FetchOutcome::Fetched { inserted: 2, refreshed: 0, skipped: 0 });

    let source = h.store.get(id).await.unwrap().unwrap();
    let second = h.loader.fetch_source(&source).await.unwrap();
    assert_eq!(second, FetchOutcome::Fetched { inserted: 0, refreshed: 2, skipped: 0 });

    assert_eq!(h.store.items_for_source(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_fetch_within_guard_does_nothing() {
    let h = harness().await;
    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("a", "First").published(&rfc2822_now())]));
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let source = h.store.get(id).await.unwrap().unwrap();
    h.loader.fetch_source(&source).await.unwrap();

    // a new entry appears, but the source was just updated
    h.web.page(
        FEED_URL,
        &rss("Site", SITE, &[Entry::new("a", "First"), Entry::new("b", "Second").published(&rfc2822_now())]),
    );
    let source = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(h.loader.fetch_source(&source).await.unwrap(), FetchOutcome::RateLimited);

    assert_eq!(h.store.items_for_source(id).await.unwrap().len(), 1);
    assert_eq!(h.web.hits(FEED_URL), 1);
}

#[tokio::test]
async fn stale_snapshot_still_hits_the_guard() {
    let h = harness().await;
    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("a", "First").published(&rfc2822_now())]));
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    // taken before any fetch, so last_update is still empty
    let snapshot = h.store.get(id).await.unwrap().unwrap();
    assert!(snapshot.last_update.is_none());

    let first = h.loader.fetch_source(&snapshot).await.unwrap();
    assert_eq!(first, FetchOutcome::Fetched { inserted: 1, refreshed: 0, skipped: 0 });
    assert_eq!(h.loader.fetch_source(&snapshot).await.unwrap(), FetchOutcome::RateLimited);

    assert_eq!(h.web.hits(FEED_URL), 1);
}

#[tokio::test]
async fn missing_and_future_dates_become_fetch_time() {
    let h = harness().await;
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("undated", "No date"),
                Entry::new("future", "From the future").published("Fri, 01 Jan 2100 00:00:00 GMT"),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let before = Utc::now() - Duration::seconds(2);
    h.loader.update_one(id).await.unwrap();
    let after = Utc::now() + Duration::seconds(2);

    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        info!("{} published {}", item.uid, item.published);
        assert!(item.published >= before && item.published <= after, "{} has {}", item.uid, item.published);
    }
}

#[tokio::test]
async fn unparsable_and_epoch_dates_become_fetch_time() {
    let h = harness().await;
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("garbled", "Garbled date").published("not a date"),
                Entry::new("epoch", "Epoch").published("Thu, 01 Jan 1970 00:00:00 GMT"),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let before = Utc::now() - Duration::seconds(2);
    let outcome = h.loader.update_one(id).await.unwrap();
    let after = Utc::now() + Duration::seconds(2);
    assert_eq!(outcome, FetchOutcome::Fetched { inserted: 2, refreshed: 0, skipped: 0 });

    for item in h.store.items_for_source(id).await.unwrap() {
        assert!(item.published >= before && item.published <= after, "{} has {}", item.uid, item.published);
    }
}

#[tokio::test]
async fn dates_before_1970_fall_outside_the_window() {
    let h = harness().await;
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("sixties", "Old news").published("Mon, 01 Jan 1962 00:00:00 GMT"),
                Entry::new("today", "Today").published(&rfc2822_now()),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let outcome = h.loader.update_one(id).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched { inserted: 1, refreshed: 0, skipped: 1 });

    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].uid, "today");
}

#[tokio::test]
async fn items_older_than_window_are_not_stored() {
    let h = harness().await;
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("old", "Ancient").published("Mon, 01 Jan 2001 00:00:00 GMT"),
                Entry::new("new", "Recent").published(&rfc2822_now()),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let outcome = h.loader.update_one(id).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Fetched { inserted: 1, refreshed: 0, skipped: 1 });

    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].uid, "new");
}

#[tokio::test]
async fn filter_keeps_only_matching_items() {
    let h = harness().await;
    let now = rfc2822_now();
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("1", "Breaking news").published(&now),
                Entry::new("2", "Weather").body("Sunny all week").published(&now),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], Some("/breaking/i")).await;

    h.loader.update_one(id).await.unwrap();

    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Breaking news");
}

#[tokio::test]
async fn invalid_filter_drops_nothing() {
    let h = harness().await;
    let now = rfc2822_now();
    h.web.page(
        FEED_URL,
        &rss("Site", SITE, &[Entry::new("1", "One").published(&now), Entry::new("2", "Two").published(&now)]),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], Some("/(unclosed/")).await;

    h.loader.update_one(id).await.unwrap();
    assert_eq!(h.store.items_for_source(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn shared_icon_is_downloaded_once() {
    let h = harness().await;
    let now = rfc2822_now();
    let favicon = "https://site.example/favicon.ico";
    h.web.binary(favicon, png_bytes(64, 64));
    h.web.page(
        FEED_URL,
        &rss("Site", SITE, &[Entry::new("1", "One").published(&now), Entry::new("2", "Two").published(&now)]),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    h.loader.update_one(id).await.unwrap();

    assert_eq!(h.web.hits(favicon), 1);
    let key = cache_key(favicon, ICON_EXTENSION);
    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.icon.as_deref() == Some(key.as_str())));
    assert!(h.data_dir.path().join("favicons").join(&key).is_file());
}

#[tokio::test]
async fn media_failures_keep_the_item() {
    let h = harness().await;
    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("1", "One").published(&rfc2822_now())]));
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    h.loader.update_one(id).await.unwrap();

    let items = h.store.items_for_source(id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].icon, None);
    assert_eq!(items[0].link, "https://site.example/1");
}

#[tokio::test]
async fn content_and_titles_are_sanitized() {
    let h = harness().await;
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("1", "<b>Bold</b> <script>x()</script>title")
                    .body(r#"<p onclick="steal()">Hello</p><script>alert(1)</script>"#)
                    .published(&rfc2822_now()),
                Entry::new("2", "").body("untitled").published(&rfc2822_now()),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    h.loader.update_one(id).await.unwrap();

    let items = h.store.items_for_source(id).await.unwrap();
    let first = items.iter().find(|item| item.uid == "1").unwrap();
    assert_eq!(first.content, "<p>Hello</p>");
    assert_eq!(first.title, "<b>Bold</b> title");

    let untitled = items.iter().find(|item| item.uid == "2").unwrap();
    assert_eq!(untitled.title, "[no title]");
}

#[tokio::test]
async fn load_failure_is_recorded_and_cleared_later() {
    let h = harness_with(|config| config.rate_guard_seconds = 0).await;
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    let outcome = h.loader.update_one(id).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Failed(ref message) if message.contains("404")));

    let source = h.store.get(id).await.unwrap().unwrap();
    assert!(source.error.is_some());
    assert!(source.last_update.is_none());
    assert!(h.store.items_for_source(id).await.unwrap().is_empty());

    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("1", "One").published(&rfc2822_now())]));
    h.loader.update_one(id).await.unwrap();

    let source = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(source.error, None);
    assert!(source.last_update.is_some());
}

#[tokio::test]
async fn invalid_params_fail_without_network() {
    let h = harness().await;
    let id = h.add_source("rss", &[("url", "ftp://site.example/feed")], None).await;

    let outcome = h.loader.update_one(id).await.unwrap();
    assert!(matches!(outcome, FetchOutcome::Failed(ref message) if message.contains("http(s)")));
    assert_eq!(h.web.hits("ftp://site.example/feed"), 0);
}

#[tokio::test]
async fn unknown_spout_is_recorded() {
    let h = harness().await;
    let id = h.add_source("nope", &[], None).await;

    let outcome = h.loader.update_one(id).await.unwrap();
    assert_eq!(outcome, FetchOutcome::Failed("unknown spout: nope".to_string()));

    let source = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(source.error.as_deref(), Some("unknown spout: nope"));
}

#[tokio::test]
async fn update_one_rejects_unknown_ids() {
    let h = harness().await;
    let err = h.loader.update_one(42).await.unwrap_err();
    assert!(matches!(err, LoaderError::SourceNotFound { id: 42 }));
}

#[tokio::test]
async fn last_entry_tracks_newest_inserted_item() {
    let h = harness().await;
    let newest = Utc::now() - Duration::hours(1);
    let older = Utc::now() - Duration::days(3);
    h.web.page(
        FEED_URL,
        &rss(
            "Site",
            SITE,
            &[
                Entry::new("1", "Older").published(&older.to_rfc2822()),
                Entry::new("2", "Newest").published(&newest.to_rfc2822()),
            ],
        ),
    );
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;

    h.loader.update_one(id).await.unwrap();

    let source = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(source.last_entry.map(|t| t.timestamp()), Some(newest.timestamp()));
}

#[tokio::test]
async fn update_all_summarizes_the_batch() {
    let h = harness().await;
    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("1", "One").published(&rfc2822_now())]));
    h.add_source("rss", &[("url", FEED_URL)], None).await;
    h.add_source("rss", &[("url", "https://down.example/feed")], None).await;

    let summary = h.loader.update_all().await.unwrap();
    assert_eq!(summary.sources, 2);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.inserted, 1);

    // everything was just updated
    let again = h.loader.update_all().await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(again.inserted, 0);
}

#[tokio::test]
async fn cleanup_removes_unreferenced_media() {
    let h = harness().await;
    let favicon = "https://site.example/favicon.ico";
    h.web.binary(favicon, png_bytes(32, 32));
    h.web.page(FEED_URL, &rss("Site", SITE, &[Entry::new("1", "One").published(&rfc2822_now())]));
    let id = h.add_source("rss", &[("url", FEED_URL)], None).await;
    h.loader.update_one(id).await.unwrap();

    let favicons = h.data_dir.path().join("favicons");
    let thumbnails = h.data_dir.path().join("thumbnails");
    std::fs::create_dir_all(&thumbnails).unwrap();
    std::fs::write(favicons.join("orphan.png"), b"x").unwrap();
    std::fs::write(favicons.join(".htaccess"), b"deny from all").unwrap();
    std::fs::write(thumbnails.join("orphan.jpg"), b"x").unwrap();
    std::fs::create_dir_all(thumbnails.join("nested")).unwrap();

    let summary = h.loader.cleanup().await.unwrap();
    assert_eq!(summary.icons_removed, 1);
    assert_eq!(summary.thumbnails_removed, 1);

    assert!(favicons.join(cache_key(favicon, ICON_EXTENSION)).is_file());
    assert!(favicons.join(".htaccess").is_file());
    assert!(!favicons.join("orphan.png").exists());
    assert!(thumbnails.join("nested").is_dir());
}

#[tokio::test]
async fn readability_content_replaces_feed_body() {
    let h = harness_with(|config| config.readability_api_key = Some("KEY".to_string())).await;
    let now = rfc2822_now();
    h.web.page(
        FEED_URL,
        &rss("Site", SITE, &[Entry::new("1", "One").body("teaser").published(&now), Entry::new("2", "Two").body("short").published(&now)]),
    );
    h.web.page(
        "https://readability.com/api/content/v1/parser?token=KEY&url=https%3A%2F%2Fsite.example%2F1",
        r#"{"content": "<p>Full article</p>"}"#,
    );
    let id = h.add_source("rss_readability", &[("url", FEED_URL)], None).await;

    h.loader.update_one(id).await.unwrap();

    let items = h.store.items_for_source(id).await.unwrap();
    let extracted = items.iter().find(|item| item.uid == "1").unwrap();
    assert_eq!(extracted.content, "<p>Full article</p>");

    let degraded = items.iter().find(|item| item.uid == "2").unwrap();
    assert_eq!(degraded.content, "readability parse error <br>short");
}

#[tokio::test]
async fn fetch_title_reads_without_storing() {
    let h = harness().await;
    h.web.page(FEED_URL, &rss("Example Site", SITE, &[Entry::new("1", "One")]));

    let params: SpoutParams = [("url".to_string(), FEED_URL.to_string())].into_iter().collect();
    assert_eq!(h.loader.fetch_title("rss", &params).await.as_deref(), Some("Example Site"));
    assert_eq!(h.loader.fetch_title("nope", &params).await, None);
    assert!(h.store.list_sources().await.unwrap().is_empty());
}

#[tokio::test]
async fn available_spouts_lists_registry() {
    let h = harness().await;
    let types: Vec<&str> = h.loader.available_spouts().iter().map(|info| info.spout_type).collect();
    assert_eq!(types, vec!["rss", "rss_readability", "reddit"]);
}
