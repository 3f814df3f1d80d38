use crate::rss_utils::slug::slugify;
use crate::types::{PostLedger, PostRecord, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Append-only SQLite ledger of published posts.
///
/// Uniqueness of `identity`, `link` and `title_slug` is enforced by the schema,
/// so even a caller that skipped `exists` cannot create a second row for a story.
/// Empty slugs are stored as NULL so untitled items do not collide with each other.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // One connection: passes never overlap, so a single writer is enough
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.setup_schema().await?;

        info!("Opened post ledger at {}", path.as_ref().display());
        Ok(ledger)
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.setup_schema().await?;
        Ok(ledger)
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL UNIQUE,
                link TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                title_slug TEXT UNIQUE,
                published_at TEXT,
                posted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<PostRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT identity, link, title, title_slug, published_at, posted_at
            FROM posts
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<PostRecord> {
                Ok(PostRecord {
                    identity: r.try_get("identity")?,
                    link: r.try_get("link")?,
                    title: r.try_get("title")?,
                    title_slug: r.try_get::<Option<String>, _>("title_slug")?.unwrap_or_default(),
                    published_at: r.try_get("published_at")?,
                    posted_at: r.try_get("posted_at")?,
                })
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PostLedger for SqliteLedger {
    async fn exists(&self, identity: &str, link: &str, title_slug: &str) -> anyhow::Result<bool> {
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM posts
                WHERE identity = ?1 OR link = ?2 OR (?3 <> '' AND title_slug = ?3)
            )
            "#,
        )
        .bind(identity)
        .bind(link)
        .bind(title_slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn exists_title_prefix(&self, slug_prefix: &str) -> anyhow::Result<bool> {
        if slug_prefix.is_empty() {
            return Ok(false);
        }
        let with_separator = format!("{}-", slug_prefix);
        let found: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM posts
                WHERE title_slug = ?1 OR substr(title_slug, 1, length(?2)) = ?2
            )
            "#,
        )
        .bind(slug_prefix)
        .bind(&with_separator)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn record(
        &self,
        identity: &str,
        link: &str,
        title: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let slug = slugify(title);
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO posts (identity, link, title, title_slug, published_at, posted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(identity)
        .bind(link)
        .bind(title)
        .bind((!slug.is_empty()).then_some(slug.as_str()))
        .bind(published_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(identity, "Ledger already holds this post; insert ignored");
        }
        Ok(inserted)
    }

    async fn count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// In-process ledger with the same uniqueness rules, for tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<PostRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PostRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Vec<PostRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory ledger lock poisoned"))
    }
}

#[async_trait]
impl PostLedger for MemoryLedger {
    async fn exists(&self, identity: &str, link: &str, title_slug: &str) -> anyhow::Result<bool> {
        Ok(self.lock()?.iter().any(|r| {
            r.identity == identity
                || r.link == link
                || (!title_slug.is_empty() && r.title_slug == title_slug)
        }))
    }

    async fn exists_title_prefix(&self, slug_prefix: &str) -> anyhow::Result<bool> {
        if slug_prefix.is_empty() {
            return Ok(false);
        }
        let with_separator = format!("{}-", slug_prefix);
        Ok(self
            .lock()?
            .iter()
            .any(|r| r.title_slug == slug_prefix || r.title_slug.starts_with(&with_separator)))
    }

    async fn record(
        &self,
        identity: &str,
        link: &str,
        title: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<bool> {
        let title_slug = slugify(title);
        let mut records = self.lock()?;
        let collides = records.iter().any(|r| {
            r.identity == identity
                || r.link == link
                || (!title_slug.is_empty() && r.title_slug == title_slug)
        });
        if collides {
            return Ok(false);
        }
        records.push(PostRecord {
            identity: identity.to_string(),
            link: link.to_string(),
            title: title.to_string(),
            title_slug,
            published_at,
            posted_at: Utc::now(),
        });
        Ok(true)
    }

    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self.lock()?.len() as u64)
    }
}
