//! The assembled output cache and its per-route middleware state.

use std::sync::Arc;

use tracing::{info, warn};

use super::config::CacheConfig;
use super::coordinator::LockCoordinator;
use super::error::CacheError;
use super::keys::CacheKey;
use super::policy::{PolicyBuilder, PolicyChain};
use super::profile::ProfileRegistry;
use super::store::{CacheStore, MemoryStore};

/// Shared handle to the store, coordinator, profiles and base policies.
///
/// Cloning is cheap; every clone refers to the same cache.
#[derive(Clone)]
pub struct OutputCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    coordinator: LockCoordinator,
    profiles: ProfileRegistry,
    base: PolicyChain,
}

/// Per-route state for [`output_cache_layer`](super::output_cache_layer).
#[derive(Clone)]
pub struct CacheState {
    pub cache: OutputCache,
    pub chain: Arc<PolicyChain>,
}

impl OutputCache {
    pub fn builder(config: CacheConfig) -> OutputCacheBuilder {
        OutputCacheBuilder {
            config,
            store: None,
            base: PolicyBuilder::new(),
            profiles: Vec::new(),
        }
    }

    /// Middleware state for one route: the base policies followed by `policies`.
    pub fn route(&self, policies: PolicyBuilder) -> Result<CacheState, CacheError> {
        let route = policies.build(&self.inner.profiles)?;
        Ok(CacheState {
            cache: self.clone(),
            chain: Arc::new(self.inner.base.then(&route)),
        })
    }

    /// Middleware state that applies only the base policies.
    pub fn base_state(&self) -> CacheState {
        CacheState {
            cache: self.clone(),
            chain: Arc::new(self.inner.base.clone()),
        }
    }

    /// Remove every entry labelled `tag`.
    ///
    /// Store failures are logged, never returned.
    pub async fn evict_by_tag(&self, tag: &str) {
        match self.inner.store.evict_by_tag(tag).await {
            Ok(()) => info!(outcache = "evict", tag, "evicted entries by tag"),
            Err(error) => warn!(outcache = "evict", tag, error = %error, "tag eviction failed"),
        }
    }

    pub async fn evict(&self, key: &CacheKey) {
        if let Err(error) = self.inner.store.evict(key).await {
            warn!(outcache = "evict", key = %key, error = %error, "key eviction failed");
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &LockCoordinator {
        &self.inner.coordinator
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.inner.profiles
    }
}

pub struct OutputCacheBuilder {
    config: CacheConfig,
    store: Option<Arc<dyn CacheStore>>,
    base: PolicyBuilder,
    profiles: Vec<(String, PolicyBuilder)>,
}

impl OutputCacheBuilder {
    /// Replace the default [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the base policies applied before every route's own.
    ///
    /// The default is [`PolicyBuilder::new`].
    pub fn base_policy(mut self, base: PolicyBuilder) -> Self {
        self.base = base;
        self
    }

    /// Register a named profile after those declared in configuration.
    pub fn profile(mut self, name: impl Into<String>, policies: PolicyBuilder) -> Self {
        self.profiles.push((name.into(), policies));
        self
    }

    pub fn build(self) -> Result<OutputCache, CacheError> {
        let mut profiles = ProfileRegistry::from_config(&self.config)?;
        for (name, policies) in self.profiles {
            profiles.register(name, policies)?;
        }
        let base = self.base.build(&profiles)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(&self.config)));
        let coordinator = LockCoordinator::new(self.config.lock_timeout());

        Ok(OutputCache {
            inner: Arc::new(Inner {
                config: self.config,
                store,
                coordinator,
                profiles,
                base,
            }),
        })
    }
}
