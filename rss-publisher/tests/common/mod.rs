#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rss_publisher::types::*;
use rss_publisher::{Collaborators, MemoryLedger, PipelineConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn item(n: usize) -> FeedItem {
    FeedItem {
        identity: format!("guid-{}", n),
        link: format!("https://news.example.com/story-{}", n),
        title: format!("Story number {}", n),
        published_at: None,
        raw_body: format!(r#"<p>Body of story {}</p><img src="/img/{}.jpg">"#, n, n),
        raw_snippet: format!("Snippet {}", n),
        categories: vec!["World".to_string()],
    }
}

pub fn items(range: std::ops::RangeInclusive<usize>) -> Vec<FeedItem> {
    range.map(item).collect()
}

pub fn test_config(max_items: usize) -> PipelineConfig {
    PipelineConfig {
        max_items,
        item_delay: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

#[derive(Default)]
pub struct FakeFeed {
    pub items: Mutex<Vec<FeedItem>>,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
}

impl FakeFeed {
    pub fn with_items(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    fn feed_url(&self) -> &str {
        "https://news.example.com/feed.xml"
    }

    async fn fetch_items(&self) -> Result<Vec<FeedItem>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("feed unreachable");
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub pages: HashMap<String, String>,
    pub fail_images: bool,
    pub images_fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {}", url))
    }

    async fn fetch_image(&self, url: &str) -> Result<ImageAsset> {
        self.images_fetched.lock().unwrap().push(url.to_string());
        if self.fail_images {
            bail!("image host down");
        }
        Ok(ImageAsset {
            source_url: url.to_string(),
            bytes: vec![1, 2, 3],
            content_type: "image/jpeg".to_string(),
        })
    }
}

pub enum RewriteMode {
    Normal,
    Fail,
    Panic,
    EmptyAfterSanitising,
    /// Never answers in any reasonable time.
    Stall,
}

pub struct FakeRewriter {
    pub mode: RewriteMode,
    /// Titles for which the rewriter misbehaves; empty means every title.
    pub only_for: Vec<String>,
    pub keywords: Vec<String>,
}

impl FakeRewriter {
    pub fn normal() -> Self {
        Self {
            mode: RewriteMode::Normal,
            only_for: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn misbehaving(mode: RewriteMode, title: &str) -> Self {
        Self {
            mode,
            only_for: vec![title.to_string()],
            keywords: Vec::new(),
        }
    }
}

#[async_trait]
impl TextRewriter for FakeRewriter {
    fn rewriter_name(&self) -> String {
        "fake".to_string()
    }

    async fn rewrite(&self, source: &ArticleSource) -> Result<RewrittenArticle> {
        let targeted = self.only_for.is_empty() || self.only_for.contains(&source.title);
        if targeted {
            match self.mode {
                RewriteMode::Normal => {}
                RewriteMode::Fail => bail!("model overloaded"),
                RewriteMode::Panic => panic!("rewriter blew up"),
                RewriteMode::Stall => tokio::time::sleep(Duration::from_secs(30)).await,
                RewriteMode::EmptyAfterSanitising => {
                    return Ok(RewrittenArticle {
                        body_html: r#"<a href="https://x"></a><img src="y.png">"#.to_string(),
                        ..Default::default()
                    })
                }
            }
        }
        Ok(RewrittenArticle {
            title: Some(format!("Rewritten: {}", source.title)),
            keywords: self.keywords.clone(),
            alt_text: Some(format!("Picture for {}", source.title)),
            body_html: format!(
                r#"<p>Fresh take on {}. <a href="https://origin.example.com">Read the source</a></p><img src="https://origin.example.com/pic.jpg">"#,
                source.title
            ),
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct FakeTransformer {
    pub fail: bool,
}

#[async_trait]
impl ImageTransformer for FakeTransformer {
    fn transformer_name(&self) -> String {
        "fake".to_string()
    }

    async fn transform(&self, image: &ImageAsset) -> Result<ImageAsset> {
        if self.fail {
            bail!("edit service rejected the image");
        }
        Ok(ImageAsset {
            source_url: image.source_url.clone(),
            bytes: vec![9, 9, 9],
            content_type: "image/png".to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub fail_upload: bool,
    pub fail_post_titles: Vec<String>,
    pub stall_post_titles: Vec<String>,
    pub uploads: Mutex<Vec<ImageAsset>>,
    pub posts: Mutex<Vec<PostDraft>>,
}

impl FakePublisher {
    pub fn posts(&self) -> Vec<PostDraft> {
        self.posts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<ImageAsset> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn upload_image(&self, image: &ImageAsset) -> Result<String> {
        if self.fail_upload {
            bail!("image host quota exceeded");
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(image.clone());
        Ok(format!("https://img.host/{}.{}", uploads.len(), image.file_extension()))
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<PublishedPost> {
        if self.fail_post_titles.iter().any(|t| draft.title.contains(t.as_str())) {
            bail!("blog API returned 503");
        }
        if self.stall_post_titles.iter().any(|t| draft.title.contains(t.as_str())) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let mut posts = self.posts.lock().unwrap();
        posts.push(draft.clone());
        Ok(PublishedPost {
            id: format!("post-{}", posts.len()),
            url: format!("https://blog.example.com/{}", posts.len()),
        })
    }
}

/// Reads like a ledger but every write fails.
#[derive(Default)]
pub struct ReadOnlyLedger {
    pub inner: MemoryLedger,
}

#[async_trait]
impl PostLedger for ReadOnlyLedger {
    async fn exists(&self, identity: &str, link: &str, title_slug: &str) -> Result<bool> {
        self.inner.exists(identity, link, title_slug).await
    }

    async fn exists_title_prefix(&self, slug_prefix: &str) -> Result<bool> {
        self.inner.exists_title_prefix(slug_prefix).await
    }

    async fn record(&self, _: &str, _: &str, _: &str, _: Option<DateTime<Utc>>) -> Result<bool> {
        bail!("disk I/O error")
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Answers every lookup with "not seen" while its writes still hit a real ledger,
/// like a second instance racing on the same database.
#[derive(Default)]
pub struct ForgetfulLedger {
    pub inner: MemoryLedger,
}

#[async_trait]
impl PostLedger for ForgetfulLedger {
    async fn exists(&self, _: &str, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }

    async fn exists_title_prefix(&self, _: &str) -> Result<bool> {
        Ok(false)
    }

    async fn record(&self, identity: &str, link: &str, title: &str, published_at: Option<DateTime<Utc>>) -> Result<bool> {
        self.inner.record(identity, link, title, published_at).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Fakes wired together; keep handles to inspect them after a pass.
pub struct Harness {
    pub feed: Arc<FakeFeed>,
    pub fetcher: Arc<FakeFetcher>,
    pub rewriter: Arc<FakeRewriter>,
    pub transformer: Arc<FakeTransformer>,
    pub publisher: Arc<FakePublisher>,
}

impl Harness {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            feed: Arc::new(FakeFeed::with_items(items)),
            fetcher: Arc::new(FakeFetcher::default()),
            rewriter: Arc::new(FakeRewriter::normal()),
            transformer: Arc::new(FakeTransformer::default()),
            publisher: Arc::new(FakePublisher::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            feed: self.feed.clone(),
            fetcher: self.fetcher.clone(),
            rewriter: self.rewriter.clone(),
            transformer: self.transformer.clone(),
            publisher: self.publisher.clone(),
        }
    }
}
