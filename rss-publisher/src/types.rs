use std::time::Duration;
// Core data model and collaborator contracts live in the interfaces crate
pub use interfaces::defs::{
    ArticleSource, ContentFetcher, FeedItem, FeedSource, ImageAsset, ImageTransformer, PostDraft,
    PublishedPost, Publisher, RewrittenArticle, TextRewriter,
};
pub use interfaces::state::{PostLedger, PostRecord};

/// Outcome of a conditional feed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFetch {
    /// `304`: the previous snapshot still stands
    NotModified,
    Fetched {
        content: String,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_image_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "rss-publisher/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            max_feed_size_mb: 10,
            max_image_size_mb: 15,
            max_redirects: 5,
        }
    }
}

impl FetchConfig {
    /// Worst case for one feed fetch: every attempt timing out plus the backoff pauses
    /// between them (with jitter headroom).
    pub fn feed_fetch_budget(&self) -> Duration {
        let attempts = u64::from(self.max_retries) + 1;
        let pauses: u64 = (0..self.max_retries)
            .map(|retry| self.retry_delay_seconds.saturating_mul(1 << retry.min(5)))
            .sum();
        Duration::from_secs(attempts * self.timeout_seconds + pauses * 3 / 2 + 1)
    }
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },

    #[error("Response too large: {size_mb}MB")]
    TooLarge { size_mb: usize },

    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PublisherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_budget_covers_every_retry() {
        let config = FetchConfig::default();
        let budget = config.feed_fetch_budget();

        // 4 attempts of 30s plus 5s + 10s + 20s of pauses
        assert!(budget >= Duration::from_secs(4 * 30 + 35));
        assert!(budget < Duration::from_secs(300));
    }

    #[test]
    fn feed_budget_without_retries_is_one_attempt() {
        let config = FetchConfig {
            max_retries: 0,
            timeout_seconds: 10,
            ..FetchConfig::default()
        };
        assert_eq!(config.feed_fetch_budget(), Duration::from_secs(11));
    }
}
