use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::feed::FeedPage;

/// TTL cache for the global feed, keyed by page number (pod local).
/// Entries expire lazily on the next access after the TTL; writes do not
/// invalidate, so reads can be stale for up to one TTL.
#[derive(Clone)]
pub struct FeedCache {
    store: Arc<DashMap<usize, (Instant, FeedPage)>>,
    ttl: Duration,
    pub enabled: bool,
}

impl FeedCache {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), ttl, enabled }
    }

    pub fn from_env() -> Self {
        let secs = std::env::var("FEED_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        let enabled = std::env::var("FEED_CACHE_DISABLED")
            .map(|v| !(v == "1" || v.eq_ignore_ascii_case("true")))
            .unwrap_or(true);
        Self::new(Duration::from_secs(secs), enabled)
    }

    pub fn get(&self, page: usize) -> Option<FeedPage> {
        if !self.enabled {
            return None;
        }
        let entry = self.store.get(&page)?;
        let (stored_at, cached) = entry.value();
        if stored_at.elapsed() >= self.ttl {
            drop(entry);
            self.store.remove(&page);
            return None;
        }
        Some(cached.clone())
    }

    pub fn put(&self, page: usize, value: FeedPage) {
        if self.enabled {
            self.store.insert(page, (Instant::now(), value));
        }
    }

    /// Number of live entries. Bounded by the number of real feed pages,
    /// since callers key writes by the clamped page number.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
