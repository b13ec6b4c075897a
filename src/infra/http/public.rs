use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue,
        header::{ACCEPT_LANGUAGE, ETAG},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodRouter, get},
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::cache::{
    CacheConfig, CacheError, OutputCache, OutputCacheBuilder, PolicyBuilder, VaryByValue,
    output_cache_layer,
};

use super::middleware::log_responses;

const EXPIRE20_PROFILE: &str = "Expire20";
const DEFAULT_CULTURE: &str = "en";
const DEFAULT_SLOW_DELAY: Duration = Duration::from_secs(1);

/// Handler state for the demo routes.
#[derive(Clone)]
pub struct DemoState {
    counter: Arc<AtomicUsize>,
    slow_delay: Duration,
}

impl Default for DemoState {
    fn default() -> Self {
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
            slow_delay: DEFAULT_SLOW_DELAY,
        }
    }
}

impl DemoState {
    pub fn with_slow_delay(mut self, delay: Duration) -> Self {
        self.slow_delay = delay;
        self
    }

    /// Number of times `/counter` has actually executed.
    pub fn counter(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Register the profiles the demo routes reference unless configuration
/// already declares them.
pub fn with_demo_profiles(
    builder: OutputCacheBuilder,
    config: &CacheConfig,
) -> OutputCacheBuilder {
    let declared = config
        .profiles
        .keys()
        .any(|name| name.eq_ignore_ascii_case(EXPIRE20_PROFILE));
    if declared {
        builder
    } else {
        builder.profile(
            EXPIRE20_PROFILE,
            PolicyBuilder::empty().expire(Duration::from_secs(20)),
        )
    }
}

pub fn build_router(cache: &OutputCache, state: DemoState) -> Result<Router, CacheError> {
    let culture = VaryByValue::new("culture", |request| {
        Ok(culture_from_headers(request.headers))
    });

    let router = Router::new()
        .route(
            "/",
            cached(cache, get(index), PolicyBuilder::empty().tag(["home"]))?,
        )
        .route(
            "/cached",
            cached(cache, get(timestamp), PolicyBuilder::empty().profile(EXPIRE20_PROFILE))?,
        )
        .route(
            "/nocache",
            cached(cache, get(timestamp), PolicyBuilder::empty().no_cache())?,
        )
        .route(
            "/query",
            cached(
                cache,
                get(query),
                PolicyBuilder::empty().vary_by_query(["culture"]),
            )?,
        )
        .route("/etag", cached(cache, get(etag), PolicyBuilder::empty())?)
        .route(
            "/slow",
            cached(cache, get(slow), PolicyBuilder::empty().locking(true))?,
        )
        .route(
            "/culture",
            cached(
                cache,
                get(culture_page),
                PolicyBuilder::empty().vary_by_value(culture),
            )?,
        )
        .route(
            "/counter",
            cached(
                cache,
                get(counter),
                PolicyBuilder::empty()
                    .tag(["counter"])
                    .expire(Duration::from_secs(5))
                    .refresh_on_request_no_cache(),
            )?,
        )
        .with_state(state)
        .layer(middleware::from_fn(log_responses));

    Ok(router)
}

fn cached(
    cache: &OutputCache,
    route: MethodRouter<DemoState>,
    policies: PolicyBuilder,
) -> Result<MethodRouter<DemoState>, CacheError> {
    let state = cache.route(policies)?;
    Ok(route.layer(middleware::from_fn_with_state(state, output_cache_layer)))
}

/// First language tag of `Accept-Language`, lowercased; `en` when absent.
pub fn culture_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_CULTURE.to_string())
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

async fn index() -> String {
    format!("Hello from outcache. Rendered at {}", now())
}

async fn timestamp() -> String {
    now()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CultureQuery {
    culture: Option<String>,
}

async fn query(Query(params): Query<CultureQuery>) -> String {
    let culture = params.culture.as_deref().unwrap_or(DEFAULT_CULTURE);
    format!("culture={culture} at {}", now())
}

async fn etag() -> Response {
    let body = format!("etag demo rendered at {}", now());
    let digest = Sha256::digest(body.as_bytes());
    let tag = format!("\"{}\"", hex::encode(&digest[..8]));

    let mut response = body.into_response();
    if let Ok(value) = HeaderValue::from_str(&tag) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

async fn slow(State(state): State<DemoState>) -> String {
    tokio::time::sleep(state.slow_delay).await;
    format!("slow response rendered at {}", now())
}

async fn culture_page(headers: HeaderMap) -> String {
    format!("culture={} at {}", culture_from_headers(&headers), now())
}

async fn counter(State(state): State<DemoState>) -> String {
    let count = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    format!("counter={count}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn culture_takes_first_language_tag() {
        assert_eq!(culture_from_headers(&headers("fr-CH, fr;q=0.9, en;q=0.8")), "fr-ch");
        assert_eq!(culture_from_headers(&headers("de;q=0.7")), "de");
    }

    #[test]
    fn culture_defaults_to_english() {
        assert_eq!(culture_from_headers(&HeaderMap::new()), "en");
        assert_eq!(culture_from_headers(&headers("*")), "en");
    }

    #[test]
    fn demo_profiles_are_registered_once() {
        let config = CacheConfig::default();
        let cache = with_demo_profiles(OutputCache::builder(config.clone()), &config)
            .build()
            .expect("cache builds");
        assert!(cache.profiles().contains(EXPIRE20_PROFILE));
        build_router(&cache, DemoState::default()).expect("router builds");
    }
}
