use crate::types::{
    Item, ItemId, ItemsRepository, NewItem, NewSource, Result, Source, SourceId, SourcesRepository, SpoutParams,
    StorageMaintenance,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

// SQLite caps bound parameters per statement; stay well under it.
const IN_CHUNK: usize = 500;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '',
        spout TEXT NOT NULL,
        params TEXT NOT NULL DEFAULT '{}',
        filter TEXT,
        error TEXT,
        lastupdate INTEGER,
        lastentry INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        uid VARCHAR(255) NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        link TEXT NOT NULL,
        author TEXT,
        thumbnail TEXT,
        icon TEXT,
        datetime INTEGER NOT NULL,
        lastseen INTEGER NOT NULL,
        UNIQUE (source, uid)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS items_lastseen ON items (lastseen)",
];

/// Sources and items persisted in one SQLite database.
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_url` and makes sure
    /// the tables exist.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { db };
        store.init_schema().await?;
        info!("Opened store at {}", database_url);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        Ok(())
    }

    pub async fn add_source(&self, source: &NewSource) -> Result<SourceId> {
        let params = serde_json::to_string(&source.params)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sources (title, tags, spout, params, filter)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.title)
        .bind(source.tags.join(","))
        .bind(&source.spout)
        .bind(params)
        .bind(source.filter.as_deref())
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        info!("Added source {} ({}) with ID: {}", source.title, source.spout, id);
        Ok(id)
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY id").fetch_all(&self.db).await?;
        rows.iter().map(source_from_row).collect()
    }

    /// Stored items of a source, newest first.
    pub async fn items_for_source(&self, source_id: SourceId) -> Result<Vec<Item>> {
        let rows = sqlx::query("SELECT * FROM items WHERE source = ? ORDER BY datetime DESC, id DESC")
            .bind(source_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Overrides an item's last-seen stamp.
    pub async fn set_last_seen(&self, item_id: ItemId, last_seen: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE items SET lastseen = ? WHERE id = ?")
            .bind(last_seen.timestamp())
            .bind(item_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let tags: String = row.try_get("tags")?;
    let params: String = row.try_get("params")?;
    let params: SpoutParams = if params.trim().is_empty() {
        SpoutParams::new()
    } else {
        serde_json::from_str(&params)?
    };

    Ok(Source {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        tags: tags
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        spout: row.try_get("spout")?,
        params,
        filter: row.try_get("filter")?,
        error: row.try_get("error")?,
        last_update: row.try_get::<Option<i64>, _>("lastupdate")?.map(timestamp),
        last_entry: row.try_get::<Option<i64>, _>("lastentry")?.map(timestamp),
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    Ok(Item {
        id: row.try_get("id")?,
        source_id: row.try_get("source")?,
        uid: row.try_get("uid")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        link: row.try_get("link")?,
        author: row.try_get("author")?,
        thumbnail: row.try_get("thumbnail")?,
        icon: row.try_get("icon")?,
        published: timestamp(row.try_get("datetime")?),
        last_seen: timestamp(row.try_get("lastseen")?),
    })
}

#[async_trait]
impl ItemsRepository for SqliteStore {
    async fn find_existing(&self, uids: &[String], source_id: SourceId) -> anyhow::Result<HashMap<String, ItemId>> {
        let mut found = HashMap::new();

        for chunk in uids.chunks(IN_CHUNK) {
            let sql = format!(
                "SELECT id, uid FROM items WHERE source = ? AND uid IN ({})",
                placeholders(chunk.len())
            );

            let mut query = sqlx::query(&sql).bind(source_id);
            for uid in chunk {
                query = query.bind(uid);
            }

            for row in query.fetch_all(&self.db).await? {
                found.insert(row.try_get::<String, _>("uid")?, row.try_get::<i64, _>("id")?);
            }
        }

        Ok(found)
    }

    async fn add(&self, item: &NewItem) -> anyhow::Result<ItemId> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO items (source, uid, title, content, link, author, thumbnail, icon, datetime, lastseen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.source_id)
        .bind(&item.uid)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.link)
        .bind(item.author.as_deref())
        .bind(item.thumbnail.as_deref())
        .bind(item.icon.as_deref())
        .bind(item.published.timestamp())
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn refresh_last_seen(&self, item_ids: &[ItemId]) -> anyhow::Result<()> {
        let now = Utc::now().timestamp();

        for chunk in item_ids.chunks(IN_CHUNK) {
            let sql = format!("UPDATE items SET lastseen = ? WHERE id IN ({})", placeholders(chunk.len()));

            let mut query = sqlx::query(&sql).bind(now);
            for id in chunk {
                query = query.bind(id);
            }
            query.execute(&self.db).await?;
        }

        debug!("Refreshed last-seen of {} items", item_ids.len());
        Ok(())
    }

    async fn cleanup(&self, retention_days: i64) -> anyhow::Result<u64> {
        let cutoff = (Utc::now() - Duration::days(retention_days)).timestamp();

        let result = sqlx::query("DELETE FROM items WHERE lastseen < ?")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    async fn has_thumbnail(&self, file_name: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE thumbnail = ?")
            .bind(file_name)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn has_icon(&self, file_name: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE icon = ?")
            .bind(file_name)
            .fetch_one(&self.db)
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl SourcesRepository for SqliteStore {
    async fn get_due(&self) -> anyhow::Result<Vec<Source>> {
        // NULL sorts first in SQLite, so never-updated sources lead
        let rows = sqlx::query("SELECT * FROM sources ORDER BY lastupdate ASC, id ASC")
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(source_from_row).collect::<Result<Vec<_>>>()?)
    }

    async fn get(&self, id: SourceId) -> anyhow::Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.as_ref().map(source_from_row).transpose()?)
    }

    async fn set_error(&self, id: SourceId, message: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE sources SET error = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn save_last_update(&self, id: SourceId, last_entry: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        let last_entry = last_entry.map(|entry| entry.timestamp());

        sqlx::query(
            r#"
            UPDATE sources
            SET lastupdate = ?,
                lastentry = MAX(COALESCE(lastentry, ?), COALESCE(?, lastentry))
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(last_entry)
        .bind(last_entry)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StorageMaintenance for SqliteStore {
    async fn optimize(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.db).await?;
        Ok(())
    }
}
