use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A post that made it onto the blog. Rows are append-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostRecord {
    pub identity: String,
    pub link: String,
    pub title: String,
    pub title_slug: String,
    pub published_at: Option<DateTime<Utc>>,
    pub posted_at: DateTime<Utc>,
}

/// Durable record of published items, consulted before every publish.
///
/// `identity`, `link` and `title_slug` are each unique. Recording an item that
/// collides on any of them is a no-op that reports `false`, never an error.
#[async_trait]
pub trait PostLedger: Send + Sync {
    async fn exists(&self, identity: &str, link: &str, title_slug: &str) -> Result<bool>;

    /// True when some stored slug starts with `slug_prefix`.
    async fn exists_title_prefix(&self, slug_prefix: &str) -> Result<bool>;

    async fn record(
        &self,
        identity: &str,
        link: &str,
        title: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn count(&self) -> Result<u64>;
}
