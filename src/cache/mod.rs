//! HTTP response output caching.
//!
//! A route opts in by installing [`output_cache_layer`] with a [`CacheState`]
//! obtained from [`OutputCache::route`]. Per request the layer:
//!
//! - runs the route's [`PolicyChain`] to decide whether caching applies,
//! - derives a [`CacheKey`] from the method, path and vary-by dimensions,
//! - answers from the [`CacheStore`] (fresh hit or 304) when it can,
//! - otherwise lets one leader per key run the handler while concurrent
//!   requests wait, and stores the leader's response.
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_expiration_secs = 60
//!
//! [cache.profiles.Expire20]
//! expire_seconds = 20
//! ```

mod capture;
mod config;
mod coordinator;
mod error;
mod freshness;
mod keys;
mod lock;
mod middleware;
mod output;
mod policy;
mod profile;
mod store;

pub use capture::{Buffered, CaptureError, Captured, buffer_response, not_modified, replay};
pub use config::{CacheConfig, MAX_EXPIRATION_SECS, ProfileConfig};
pub use coordinator::{
    Acquired, FlightGuard, FlightState, FlightWaiter, LockCoordinator, WaitOutcome,
};
pub use error::{CacheError, KeyError, StoreError};
pub use freshness::{
    CacheControl, Freshness, evaluate, format_http_date, parse_http_date, response_forbids_storage,
};
pub use keys::{ANY_QUERY, CacheKey, RequestDescriptor, VaryByValue, VaryRules, build_key};
pub use middleware::output_cache_layer;
pub use output::{CacheState, OutputCache, OutputCacheBuilder};
pub use policy::{
    ActivePolicies, CacheContext, CacheDecision, DefaultPolicy, EnableCache, Expire, Locking,
    NoCache, NoStore, Policy, PolicyBuilder, PolicyChain, RequirePublic, ResponseDescriptor,
    ShortenExpiry, SkipPath, SlidingExpiry, StatusCodes, Tags, VaryByHeader, VaryByQuery,
    VaryByValuePolicy,
};
pub use profile::ProfileRegistry;
pub use store::{CacheEntry, CacheStore, MemoryStore};
