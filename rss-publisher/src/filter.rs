use crate::dedup::DedupCache;
use crate::rss_utils::{html, slug};
use crate::types::{FeedItem, PostLedger};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// How aggressively titles count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateStrictness {
    /// Identity, link or full title slug already in the ledger.
    Exact,
    /// `Exact`, plus any stored slug sharing the first `words` title words.
    /// Catches re-titled reruns at the cost of occasional false positives.
    FuzzyTitle { words: usize },
}

#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub max_items: usize,
    pub require_inline_image: bool,
    pub strictness: DuplicateStrictness,
}

impl FilterPolicy {
    pub fn new(max_items: usize, require_inline_image: bool, strictness: DuplicateStrictness) -> Self {
        Self {
            max_items: max_items.max(1),
            require_inline_image,
            strictness,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingFields,
    DuplicateInBatch,
    SeenThisRun,
    NoInlineImage,
    AlreadyPosted,
    SimilarTitle,
    LedgerUnavailable,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rejection::MissingFields => "missing title or link",
            Rejection::DuplicateInBatch => "listed twice in this feed",
            Rejection::SeenThisRun => "already selected during this run",
            Rejection::NoInlineImage => "no inline image",
            Rejection::AlreadyPosted => "already in ledger",
            Rejection::SimilarTitle => "similar title already posted",
            Rejection::LedgerUnavailable => "ledger lookup failed",
        };
        f.write_str(text)
    }
}

/// Items still eligible for publishing, in feed order, at most `max_items`.
///
/// Every item is judged on its own merits before the cap applies, so ineligible
/// entries near the top of the feed never shrink the batch. Read-only: neither
/// the ledger nor the cache is touched.
pub async fn select_candidates(
    items: &[FeedItem],
    ledger: &dyn PostLedger,
    cache: &DedupCache,
    policy: &FilterPolicy,
) -> Vec<FeedItem> {
    let mut batch = BatchKeys::default();
    let mut selected = Vec::new();

    for item in items {
        if selected.len() >= policy.max_items {
            break;
        }

        // Registered even for rejected items: a later copy of a story is never better
        let first_in_batch = batch.register(item, policy.strictness);

        let verdict = if !first_in_batch {
            Err(Rejection::DuplicateInBatch)
        } else {
            judge(item, ledger, cache, policy).await
        };

        match verdict {
            Ok(()) => selected.push(item.clone()),
            Err(reason) => debug!(identity = %item.identity, title = %item.title, %reason, "Candidate rejected"),
        }
    }

    info!(
        "Candidate filter: {} of {} feed items selected (cap {})",
        selected.len(),
        items.len(),
        policy.max_items
    );
    selected
}

/// Keys already claimed by earlier items of the same feed snapshot.
#[derive(Default)]
struct BatchKeys<'a> {
    identities: HashSet<&'a str>,
    links: HashSet<&'a str>,
    slugs: HashSet<String>,
    prefixes: HashSet<String>,
}

impl<'a> BatchKeys<'a> {
    /// Claims every key of `item`; false when any of them was already taken.
    fn register(&mut self, item: &'a FeedItem, strictness: DuplicateStrictness) -> bool {
        let fresh_identity = self.identities.insert(item.identity.as_str());
        let fresh_link = self.links.insert(item.link.as_str());
        let fresh_slug = claim(&mut self.slugs, slug::slugify(&item.title));
        let fresh_prefix = match strictness {
            DuplicateStrictness::Exact => true,
            DuplicateStrictness::FuzzyTitle { words } => {
                claim(&mut self.prefixes, slug::title_prefix(&item.title, words))
            }
        };
        fresh_identity && fresh_link && fresh_slug && fresh_prefix
    }
}

/// Empty keys never collide, matching how the ledger stores empty slugs.
fn claim(keys: &mut HashSet<String>, key: String) -> bool {
    key.is_empty() || keys.insert(key)
}

async fn judge(
    item: &FeedItem,
    ledger: &dyn PostLedger,
    cache: &DedupCache,
    policy: &FilterPolicy,
) -> Result<(), Rejection> {
    if item.title.trim().is_empty() || item.link.trim().is_empty() || item.identity.trim().is_empty() {
        return Err(Rejection::MissingFields);
    }

    if cache.seen(&item.identity) {
        return Err(Rejection::SeenThisRun);
    }

    if policy.require_inline_image
        && html::first_image_src(&item.raw_body).is_none()
        && html::first_image_src(&item.raw_snippet).is_none()
    {
        return Err(Rejection::NoInlineImage);
    }

    let title_slug = slug::slugify(&item.title);
    match ledger.exists(&item.identity, &item.link, &title_slug).await {
        Ok(true) => return Err(Rejection::AlreadyPosted),
        Ok(false) => {}
        Err(e) => {
            warn!(identity = %item.identity, "Ledger lookup failed, not selecting item: {:#}", e);
            return Err(Rejection::LedgerUnavailable);
        }
    }

    if let DuplicateStrictness::FuzzyTitle { words } = policy.strictness {
        let prefix = slug::title_prefix(&item.title, words);
        match ledger.exists_title_prefix(&prefix).await {
            Ok(true) => return Err(Rejection::SimilarTitle),
            Ok(false) => {}
            Err(e) => {
                warn!(identity = %item.identity, "Ledger prefix lookup failed, not selecting item: {:#}", e);
                return Err(Rejection::LedgerUnavailable);
            }
        }
    }

    Ok(())
}
