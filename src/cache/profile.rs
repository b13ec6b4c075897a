//! Named, reusable policy chains.
//!
//! Profiles are resolved once while the cache is assembled. A profile may
//! reference profiles registered before it; an unknown name is a
//! configuration error and never reaches request handling. Names compare
//! ASCII case-insensitively.

use std::collections::HashMap;

use super::config::CacheConfig;
use super::error::CacheError;
use super::policy::{PolicyBuilder, PolicyChain};

/// Immutable map from profile name to its resolved chain.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    /// Keyed by the lowercased name; the value keeps the registered spelling.
    profiles: HashMap<String, (String, PolicyChain)>,
}

impl ProfileRegistry {
    pub fn get(&self, name: &str) -> Result<&PolicyChain, CacheError> {
        self.profiles
            .get(&name.to_ascii_lowercase())
            .map(|(_, chain)| chain)
            .ok_or_else(|| CacheError::unknown_profile(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Register `builder` under `name`, resolving it against the profiles
    /// already present.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        builder: PolicyBuilder,
    ) -> Result<(), CacheError> {
        let name = name.into();
        let folded = name.to_ascii_lowercase();
        if self.profiles.contains_key(&folded) {
            return Err(CacheError::DuplicateProfile { name });
        }
        let chain = builder.build(self)?;
        self.profiles.insert(folded, (name, chain));
        Ok(())
    }

    /// Build the registry declared under `[cache.profiles]`.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut registry = Self::default();
        for (name, profile) in &config.profiles {
            registry.register(name.clone(), PolicyBuilder::from_profile_config(profile)?)?;
        }
        Ok(registry)
    }
}
