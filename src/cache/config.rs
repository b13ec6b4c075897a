//! Cache configuration.
//!
//! Controls the output cache and its named profiles via `outcache.toml`.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_EXPIRATION_SECS: u64 = 60;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_ENTRIES: usize = 1_000;
const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Longest configurable freshness window (ten years).
pub const MAX_EXPIRATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Output cache configuration from `outcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every request bypasses the cache.
    pub enabled: bool,
    /// Freshness window applied when no policy sets one.
    pub default_expiration_secs: u64,
    /// Maximum time a follower waits for the in-flight leader.
    pub lock_timeout_ms: u64,
    /// Whether concurrent misses for one key are coalesced by default.
    pub locking: bool,
    /// Maximum entries held by the in-memory store.
    pub max_entries: usize,
    /// Responses with larger bodies are served but never stored.
    pub max_body_bytes: usize,
    /// Named profiles routes can opt into.
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_expiration_secs: DEFAULT_EXPIRATION_SECS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            locking: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            profiles: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

/// A profile declared in configuration, e.g. `[cache.profiles.Expire20]`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProfileConfig {
    pub expire_seconds: Option<u64>,
    pub vary_by_query: Vec<String>,
    pub vary_by_header: Vec<String>,
    pub tags: Vec<String>,
    /// Disable caching entirely for routes using this profile.
    pub no_cache: bool,
    /// Serve from the cache but never write new entries.
    pub no_store: bool,
    pub locking: Option<bool>,
}
