use crate::types::{FeedFetch, FeedItem, Result};
use crate::{FeedParser, Fetcher};
use async_trait::async_trait;
use interfaces::defs::FeedSource;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Conditional-request state remembered between polls
#[derive(Default)]
struct PollState {
    last_etag: Option<String>,
    last_modified: Option<String>,
    last_items: Vec<FeedItem>,
}

/// RSS/Atom feed polled over HTTP
pub struct RssFeedSource {
    pub url: String,
    fetcher: Arc<Fetcher>,
    state: RwLock<PollState>,
}

impl RssFeedSource {
    pub fn new(url: String, fetcher: Arc<Fetcher>) -> Self {
        Self {
            url,
            fetcher,
            state: RwLock::new(PollState::default()),
        }
    }

    /// Pulls the current snapshot. A `304 Not Modified` answers with the previous snapshot.
    pub async fn pull(&self) -> Result<Vec<FeedItem>> {
        info!("Pulling RSS feed: {}", self.url);

        let (etag, last_modified) = {
            let state = self.state.read().await;
            (state.last_etag.clone(), state.last_modified.clone())
        };

        let fetched = self
            .fetcher
            .fetch_feed(&self.url, etag.as_deref(), last_modified.as_deref())
            .await;

        let mut state = self.state.write().await;

        let (content, etag, last_modified) = match fetched {
            Ok(FeedFetch::Fetched {
                content,
                etag,
                last_modified,
            }) => (content, etag, last_modified),
            Ok(FeedFetch::NotModified) => {
                debug!("Feed {} not modified, reusing {} items", self.url, state.last_items.len());
                return Ok(state.last_items.clone());
            }
            Err(e) => {
                error!("Failed to fetch RSS feed {}: {}", self.url, e);
                return Err(e);
            }
        };

        if !FeedParser::is_valid_feed_content(&content) {
            warn!("Response from {} does not look like RSS/Atom", self.url);
        }

        let parsed_feed = FeedParser::parse_feed(&content)?;
        if let Some(title) = &parsed_feed.title {
            debug!("Feed title: {}", title);
        }

        state.last_etag = etag;
        state.last_modified = last_modified;
        state.last_items = parsed_feed.items.clone();

        info!("Successfully pulled {} items from RSS feed {}", parsed_feed.items.len(), self.url);
        Ok(parsed_feed.items)
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    fn feed_url(&self) -> &str {
        &self.url
    }

    async fn fetch_items(&self) -> anyhow::Result<Vec<FeedItem>> {
        Ok(self.pull().await?)
    }
}
