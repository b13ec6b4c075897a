//! Cache storage.
//!
//! [`CacheStore`] is the pluggable persistence seam; [`MemoryStore`] is the
//! in-process default with LRU capacity eviction and a tag index.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use super::config::CacheConfig;
use super::error::StoreError;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const METRIC_EVICT_TOTAL: &str = "outcache_evict_total";

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// When set, every read moves `expires_at` this far past the read time.
    pub sliding: Option<Duration>,
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        created_at: OffsetDateTime,
        expiration: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            created_at,
            expires_at: expiry_after(created_at, expiration),
            sliding: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_sliding(mut self, window: Option<Duration>) -> Self {
        self.sliding = window;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Whole seconds since the entry was created, never negative.
    pub fn age_seconds(&self, now: OffsetDateTime) -> u64 {
        (now - self.created_at).whole_seconds().max(0) as u64
    }
}

/// `start + window`, saturating at the latest representable instant.
fn expiry_after(start: OffsetDateTime, window: Duration) -> OffsetDateTime {
    time::Duration::try_from(window)
        .ok()
        .and_then(|window| start.checked_add(window))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Pluggable response store.
///
/// Every operation is atomic with respect to concurrent callers. Eviction of
/// a key or tag that matches nothing succeeds.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for `key`, associating it with `entry.tags`.
    async fn set(&self, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError>;

    async fn evict_by_tag(&self, tag: &str) -> Result<(), StoreError>;

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError>;
}

/// In-memory store with best-effort LRU retention.
///
/// Entries and the tag index share one mutex, so a tag eviction can never
/// interleave with a write of the same key.
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    entries: LruCache<CacheKey, CacheEntry>,
    tags: HashMap<String, HashSet<CacheKey>>,
}

impl MemoryInner {
    fn index(&mut self, key: &CacheKey, tags: &BTreeSet<String>) {
        for tag in tags {
            self.tags.entry(tag.clone()).or_default().insert(key.clone());
        }
    }

    fn unindex(&mut self, key: &CacheKey, tags: &BTreeSet<String>) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.unindex(key, &entry.tags);
        Some(entry)
    }
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::new(config.max_entries_non_zero()),
                tags: HashMap::new(),
            }),
        }
    }

    pub(crate) fn get_at(&self, key: &CacheKey, now: OffsetDateTime) -> Option<CacheEntry> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "get");
        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.remove(key);
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        if let Some(window) = entry.sliding {
            entry.expires_at = expiry_after(now, window);
        }
        Some(entry.clone())
    }

    pub(crate) fn set_entry(&self, key: CacheKey, entry: CacheEntry) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "set");
        if let Some(previous) = inner.entries.pop(&key) {
            inner.unindex(&key, &previous.tags);
        }
        inner.index(&key, &entry.tags);
        if let Some((evicted_key, evicted)) = inner.entries.push(key, entry) {
            inner.unindex(&evicted_key, &evicted.tags);
            counter!(METRIC_EVICT_TOTAL).increment(1);
            debug!(key = %evicted_key, "evicted entry to stay within capacity");
        }
    }

    pub(crate) fn evict_tag(&self, tag: &str) -> usize {
        let mut inner = mutex_lock(&self.inner, SOURCE, "evict_by_tag");
        let Some(keys) = inner.tags.remove(tag) else {
            return 0;
        };
        let mut evicted = 0;
        for key in keys {
            if inner.remove(&key).is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    pub(crate) fn evict_key(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.inner, SOURCE, "evict")
            .remove(key)
            .is_some()
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tags that currently label at least one entry.
    pub fn tag_count(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "tag_count").tags.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.get_at(key, OffsetDateTime::now_utc()))
    }

    async fn set(&self, key: CacheKey, entry: CacheEntry) -> Result<(), StoreError> {
        self.set_entry(key, entry);
        Ok(())
    }

    async fn evict_by_tag(&self, tag: &str) -> Result<(), StoreError> {
        let evicted = self.evict_tag(tag);
        debug!(tag, evicted, "evicted entries by tag");
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.evict_key(key);
        Ok(())
    }
}
