use crate::dedup::DedupCache;
use crate::filter::{select_candidates, DuplicateStrictness, FilterPolicy};
use crate::rss_utils::html::{escape_attribute, first_image_src, og_image, sanitize_article_html};
use crate::rss_utils::url::resolve;
use crate::types::{
    ArticleSource, ContentFetcher, FeedItem, FeedSource, ImageAsset, ImageTransformer, PostDraft, PostLedger,
    PublishedPost, Publisher, RewrittenArticle, TextRewriter,
};
use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_LABELS: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_items: usize,
    pub strictness: DuplicateStrictness,
    /// Items without any resolvable image are skipped. Off means text-only posts are allowed.
    pub require_image: bool,
    /// Look up the article page's Open-Graph image when the body has no `<img>`.
    pub page_image_fallback: bool,
    pub item_delay: Duration,
    pub call_timeout: Duration,
    /// Bound for the whole feed fetch, retries included. Longer than `call_timeout`.
    pub feed_timeout: Duration,
    pub stop_after_first_commit: bool,
    pub default_labels: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_items: 1,
            strictness: DuplicateStrictness::Exact,
            require_image: true,
            page_image_fallback: true,
            item_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(60),
            feed_timeout: Duration::from_secs(300),
            stop_after_first_commit: false,
            default_labels: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn filter_policy(&self) -> FilterPolicy {
        // With the page fallback on, a missing inline image is resolved later, not filtered
        let require_inline_image = self.require_image && !self.page_image_fallback;
        FilterPolicy::new(self.max_items, require_inline_image, self.strictness)
    }
}

/// External services the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn FeedSource>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub rewriter: Arc<dyn TextRewriter>,
    pub transformer: Arc<dyn ImageTransformer>,
    pub publisher: Arc<dyn Publisher>,
}

/// Where an item stopped when it did not make it to the blog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipStage {
    ImageResolve,
    ImageFetch,
    Rewrite,
    Publish,
    Unexpected,
}

impl fmt::Display for SkipStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipStage::ImageResolve => "image-resolve",
            SkipStage::ImageFetch => "image-fetch",
            SkipStage::Rewrite => "rewrite",
            SkipStage::Publish => "publish",
            SkipStage::Unexpected => "unexpected",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Committed { post: PublishedPost },
    /// Published, but the ledger write failed. A later pass may publish it again.
    Orphaned { post: PublishedPost, error: String },
    /// Published, but the ledger already held a row for this story: the post is a duplicate.
    AlreadyRecorded { post: PublishedPost },
    Skipped { stage: SkipStage, reason: String },
}

impl ItemOutcome {
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Committed { .. } | ItemOutcome::Orphaned { .. } | ItemOutcome::AlreadyRecorded { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub identity: String,
    pub title: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub fetched: usize,
    pub candidates: usize,
    pub items: Vec<ItemReport>,
    pub feed_error: Option<String>,
}

impl PassReport {
    fn new(pass_id: Uuid) -> Self {
        Self {
            pass_id,
            fetched: 0,
            candidates: 0,
            items: Vec::new(),
            feed_error: None,
        }
    }

    pub fn committed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Committed { .. }))
    }

    pub fn orphaned(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Orphaned { .. }))
    }

    pub fn already_recorded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::AlreadyRecorded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }
}

/// Per-item progress. Every non-terminal state can fall through to `Skipped`.
enum ItemState {
    Selected,
    ImageResolved(Option<String>),
    Transformed(Option<ImageAsset>),
    Published(PublishedPost),
    Done(ItemOutcome),
}

/// Drives feed items through image → rewrite → publish → commit, one at a time.
pub struct PublishPipeline {
    collaborators: Collaborators,
    ledger: Arc<dyn PostLedger>,
    cache: Mutex<DedupCache>,
    config: PipelineConfig,
}

impl PublishPipeline {
    pub fn new(collaborators: Collaborators, ledger: Arc<dyn PostLedger>, config: PipelineConfig) -> Self {
        Self {
            collaborators,
            ledger,
            cache: Mutex::new(DedupCache::new()),
            config,
        }
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub(crate) async fn reset_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// One complete pass: snapshot the feed, filter, then process candidates sequentially.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::new(Uuid::new_v4());
        let feed_url = self.collaborators.feed.feed_url().to_string();
        info!(pass_id = %report.pass_id, feed = %feed_url, "Starting pass");

        let items = match self
            .bounded_by(
                self.config.feed_timeout,
                "feed fetch",
                self.collaborators.feed.fetch_items(),
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                error!(pass_id = %report.pass_id, "Feed fetch failed, ending pass: {:#}", e);
                report.feed_error = Some(format!("{:#}", e));
                return report;
            }
        };
        report.fetched = items.len();

        let candidates = {
            let cache = self.cache.lock().await;
            select_candidates(&items, self.ledger.as_ref(), &cache, &self.config.filter_policy()).await
        };
        report.candidates = candidates.len();

        for (index, item) in candidates.iter().enumerate() {
            if index > 0 && !self.config.item_delay.is_zero() {
                debug!("Waiting {:?} before next item", self.config.item_delay);
                tokio::time::sleep(self.config.item_delay).await;
            }

            let outcome = match AssertUnwindSafe(self.process_item(item)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => ItemOutcome::Skipped {
                    stage: SkipStage::Unexpected,
                    reason: panic_message(panic),
                },
            };
            log_outcome(item, &outcome);

            let stop = self.config.stop_after_first_commit && outcome.is_published();
            report.items.push(ItemReport {
                identity: item.identity.clone(),
                title: item.title.clone(),
                outcome,
            });
            if stop {
                info!("Single-item mode: stopping after first published item");
                break;
            }
        }

        info!(
            pass_id = %report.pass_id,
            fetched = report.fetched,
            candidates = report.candidates,
            committed = report.committed(),
            skipped = report.skipped(),
            orphaned = report.orphaned(),
            duplicates = report.already_recorded(),
            "Pass finished"
        );
        report
    }

    async fn process_item(&self, item: &FeedItem) -> ItemOutcome {
        // Selected: claimed before any external call
        self.cache.lock().await.mark(&item.identity);
        info!(identity = %item.identity, title = %item.title, "Processing item");

        let mut state = ItemState::Selected;
        loop {
            state = match state {
                ItemState::Selected => self.resolve_image(item).await,
                ItemState::ImageResolved(url) => self.prepare_image(url).await,
                ItemState::Transformed(image) => self.publish(item, image).await,
                ItemState::Published(post) => self.commit(item, post).await,
                ItemState::Done(outcome) => return outcome,
            };
        }
    }

    async fn resolve_image(&self, item: &FeedItem) -> ItemState {
        let inline = first_image_src(&item.raw_body).or_else(|| first_image_src(&item.raw_snippet));
        let mut image_url = inline.and_then(|src| resolve(&item.link, &src));

        if image_url.is_none() && self.config.page_image_fallback {
            match self
                .bounded("page fetch", self.collaborators.fetcher.fetch_page(&item.link))
                .await
            {
                Ok(page) => image_url = og_image(&page).and_then(|src| resolve(&item.link, &src)),
                Err(e) => warn!(link = %item.link, "Article page fetch failed: {:#}", e),
            }
        }

        match image_url {
            Some(url) => {
                debug!(image = %url, "Image resolved");
                ItemState::ImageResolved(Some(url))
            }
            None if self.config.require_image => skip(SkipStage::ImageResolve, "no image found in item or article page"),
            None => ItemState::ImageResolved(None),
        }
    }

    async fn prepare_image(&self, image_url: Option<String>) -> ItemState {
        let Some(url) = image_url else {
            return ItemState::Transformed(None);
        };

        let original = match self
            .bounded("image fetch", self.collaborators.fetcher.fetch_image(&url))
            .await
        {
            Ok(image) => image,
            Err(e) => return skip(SkipStage::ImageFetch, format!("{}: {:#}", url, e)),
        };

        let transformer = &self.collaborators.transformer;
        match self.bounded("image transform", transformer.transform(&original)).await {
            Ok(edited) => ItemState::Transformed(Some(edited)),
            Err(e) => {
                warn!(
                    transformer = %transformer.transformer_name(),
                    "Image transform failed, using original image: {:#}", e
                );
                ItemState::Transformed(Some(original))
            }
        }
    }

    async fn publish(&self, item: &FeedItem, image: Option<ImageAsset>) -> ItemState {
        let source = ArticleSource::from(item);
        let rewritten = match self
            .bounded("rewrite", self.collaborators.rewriter.rewrite(&source))
            .await
        {
            Ok(article) => article,
            Err(e) => return skip(SkipStage::Rewrite, format!("{:#}", e)),
        };

        // The rewriter is untrusted; links and images are removed here regardless
        let body = sanitize_article_html(&rewritten.body_html);
        if body.is_empty() {
            return skip(SkipStage::Rewrite, "rewritten body is empty after sanitising");
        }

        let title = rewritten
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(item.title.as_str())
            .to_string();

        let image_tag = match &image {
            Some(asset) => Some(self.image_tag(asset, &rewritten, &title).await),
            None => None,
        };
        let html_content = match image_tag {
            Some(tag) => format!("{}\n{}", tag, body),
            None => body,
        };

        let draft = PostDraft {
            title,
            html_content,
            labels: pick_labels(&rewritten, item, &self.config.default_labels),
        };

        match self
            .bounded("publish", self.collaborators.publisher.create_post(&draft))
            .await
        {
            Ok(post) => ItemState::Published(post),
            Err(e) => skip(SkipStage::Publish, format!("{:#}", e)),
        }
    }

    /// Uploads the image; if hosting fails the post hotlinks the source image instead.
    async fn image_tag(&self, asset: &ImageAsset, rewritten: &RewrittenArticle, title: &str) -> String {
        let src = match self
            .bounded("image upload", self.collaborators.publisher.upload_image(asset))
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!(source = %asset.source_url, "Image upload failed, linking source image: {:#}", e);
                asset.source_url.clone()
            }
        };

        let alt = rewritten.alt_text.as_deref().filter(|a| !a.trim().is_empty()).unwrap_or(title);
        let image_title = rewritten
            .image_title_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(title);

        format!(
            r#"<p style="text-align: center;"><img src="{}" alt="{}" title="{}" /></p>"#,
            escape_attribute(&src),
            escape_attribute(alt),
            escape_attribute(image_title)
        )
    }

    async fn commit(&self, item: &FeedItem, post: PublishedPost) -> ItemState {
        // The feed title is recorded so the next poll derives the same slug
        let recorded = self
            .bounded(
                "ledger write",
                self.ledger
                    .record(&item.identity, &item.link, &item.title, item.published_at),
            )
            .await;
        self.cache.lock().await.mark(&item.identity);

        match recorded {
            Ok(true) => ItemState::Done(ItemOutcome::Committed { post }),
            Ok(false) => ItemState::Done(ItemOutcome::AlreadyRecorded { post }),
            Err(e) => ItemState::Done(ItemOutcome::Orphaned {
                post,
                error: format!("{:#}", e),
            }),
        }
    }

    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.bounded_by(self.config.call_timeout, what, call).await
    }

    async fn bounded_by<T>(
        &self,
        limit: Duration,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{} timed out after {:?}", what, limit)),
        }
    }
}

fn skip(stage: SkipStage, reason: impl Into<String>) -> ItemState {
    ItemState::Done(ItemOutcome::Skipped {
        stage,
        reason: reason.into(),
    })
}

/// Rewriter keywords, else feed categories, else the configured defaults.
pub fn pick_labels(rewritten: &RewrittenArticle, item: &FeedItem, defaults: &[String]) -> Vec<String> {
    let source = if !rewritten.keywords.is_empty() {
        &rewritten.keywords
    } else if !item.categories.is_empty() {
        &item.categories
    } else {
        defaults
    };

    let mut seen = HashSet::new();
    source
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_lowercase()))
        .take(MAX_LABELS)
        .map(str::to_string)
        .collect()
}

fn log_outcome(item: &FeedItem, outcome: &ItemOutcome) {
    match outcome {
        ItemOutcome::Committed { post } => {
            info!(identity = %item.identity, post_id = %post.id, url = %post.url, "Published and recorded")
        }
        ItemOutcome::Orphaned { post, error } => error!(
            identity = %item.identity,
            post_id = %post.id,
            url = %post.url,
            "ORPHANED PUBLISH: post is live but the ledger write failed ({}); backfill the ledger by hand",
            error
        ),
        ItemOutcome::AlreadyRecorded { post } => error!(
            identity = %item.identity,
            post_id = %post.id,
            url = %post.url,
            "DUPLICATE PUBLISH: ledger already held this story when recording it; remove the post by hand"
        ),
        ItemOutcome::Skipped { stage, reason } => {
            warn!(identity = %item.identity, %stage, "Item skipped: {}", reason)
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic while processing item".to_string()
    }
}
