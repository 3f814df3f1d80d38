use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the polled feed, as seen on this tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedItem {
    /// GUID when the feed supplies one, else the link.
    pub identity: String,
    pub link: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_body: String,
    pub raw_snippet: String,
    pub categories: Vec<String>,
}

/// Source material handed to a text rewriter.
#[derive(Clone, Debug)]
pub struct ArticleSource {
    pub title: String,
    pub snippet: String,
    pub body: String,
}

impl From<&FeedItem> for ArticleSource {
    fn from(item: &FeedItem) -> Self {
        Self {
            title: item.title.clone(),
            snippet: item.raw_snippet.clone(),
            body: item.raw_body.clone(),
        }
    }
}

/// Rewriter output. Only `body_html` is mandatory; richer rewriters fill the rest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewrittenArticle {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub keywords: Vec<String>,
    pub alt_text: Option<String>,
    pub image_title_text: Option<String>,
    pub body_html: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    /// Where the bytes originally came from.
    pub source_url: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl ImageAsset {
    pub fn file_extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub html_content: String,
    pub labels: Vec<String>,
}

/// Durable reference returned by a publisher once a post exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: String,
    pub url: String,
}

// Object style note:
// Every collaborator below is an untrusted external service from the
// pipeline's point of view. Implementations may fail on any call and the
// orchestrator decides what a failure means for the item in flight, so the
// traits only ever return `anyhow::Result` and never retry on their own.

#[async_trait]
pub trait FeedSource: Send + Sync {
    fn feed_url(&self) -> &str;

    /// Current snapshot of the feed, in feed order.
    async fn fetch_items(&self) -> Result<Vec<FeedItem>>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;

    async fn fetch_image(&self, url: &str) -> Result<ImageAsset>;
}

#[async_trait]
pub trait TextRewriter: Send + Sync {
    fn rewriter_name(&self) -> String;

    async fn rewrite(&self, source: &ArticleSource) -> Result<RewrittenArticle>;
}

#[async_trait]
pub trait ImageTransformer: Send + Sync {
    fn transformer_name(&self) -> String;

    async fn transform(&self, image: &ImageAsset) -> Result<ImageAsset>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hosts an image and returns a public URL for it.
    async fn upload_image(&self, image: &ImageAsset) -> Result<String>;

    async fn create_post(&self, draft: &PostDraft) -> Result<PublishedPost>;
}
