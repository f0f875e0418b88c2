// Explicit TTL cache for fetched pages, keyed per endpoint, page and credential

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cached::{Cached, TimedCache};

use crate::fetch::RawPage;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub endpoint: String,
    pub page: u32,
    pub fingerprint: String,
}

impl PageKey {
    pub fn new(endpoint: &str, page: u32, fingerprint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            page,
            fingerprint: fingerprint.to_string(),
        }
    }
}

pub struct PageCache {
    inner: Mutex<TimedCache<PageKey, Arc<RawPage>>>,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl.as_secs())),
        }
    }

    pub fn get(&self, key: &PageKey) -> Option<Arc<RawPage>> {
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        cache.cache_get(key).cloned()
    }

    pub fn insert(&self, key: PageKey, page: Arc<RawPage>) {
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        cache.cache_set(key, page);
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = cache.cache_size();
        cache.cache_clear();
        tracing::debug!(dropped, "Page cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
