use std::collections::HashSet;

/// Identities selected during this process (or pass, see `CacheScope`).
///
/// Closes the window between selecting an item and its ledger row landing:
/// a feed that lists the same story twice, or a re-evaluation of the filter
/// before the commit, cannot pick the identity a second time.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    /// Irreversible for the lifetime of the cache.
    pub fn mark(&mut self, identity: &str) {
        self.seen.insert(identity.to_string());
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Only the scheduler calls this, and only under `CacheScope::Pass`.
    pub(crate) fn clear(&mut self) {
        self.seen.clear();
    }
}
