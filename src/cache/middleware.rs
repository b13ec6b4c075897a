//! Output cache middleware.
//!
//! Evaluates the route's policy chain, serves fresh entries and conditional
//! 304s from the store, coalesces concurrent misses for the same key, and
//! stores what the handler produces when every policy and the response
//! itself allow it.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header::CONTENT_LENGTH, request::Parts},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::capture::{Buffered, buffer_response, not_modified, replay};
use super::coordinator::{Acquired, FlightGuard, FlightState, WaitOutcome};
use super::freshness::{self, Freshness, response_forbids_storage};
use super::keys::{CacheKey, RequestDescriptor, build_key};
use super::output::{CacheState, OutputCache};
use super::policy::{ActivePolicies, CacheContext, ResponseDescriptor};
use super::store::CacheEntry;

pub(crate) const METRIC_HIT_TOTAL: &str = "outcache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "outcache_miss_total";
pub(crate) const METRIC_NOT_MODIFIED_TOTAL: &str = "outcache_not_modified_total";
pub(crate) const METRIC_STORE_TOTAL: &str = "outcache_store_total";
pub(crate) const METRIC_LOCK_WAIT_TOTAL: &str = "outcache_lock_wait_total";
pub(crate) const METRIC_LOCK_TIMEOUT_TOTAL: &str = "outcache_lock_timeout_total";

/// Middleware entry point, used with `axum::middleware::from_fn_with_state`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn output_cache_layer(
    State(state): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let cache = &state.cache;
    if !cache.config().enabled {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let mut context = CacheContext::new(cache.config());
    let descriptor = RequestDescriptor::from_parts(&parts);
    let active = state.chain.on_request(&mut context, &descriptor);
    if !context.is_enabled() {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let key = match build_key(&descriptor, context.vary()) {
        Ok(key) => key,
        Err(error) => {
            warn!(outcache = "key", error = %error, "failed to build cache key, bypassing");
            return next.run(Request::from_parts(parts, body)).await;
        }
    };

    if context.allow_lookup()
        && let Some(response) = serve_from_store(cache, &key, &parts).await
    {
        return response;
    }
    counter!(METRIC_MISS_TOTAL).increment(1);

    if !context.allow_locking() {
        debug!(outcache = "miss", key = %key, "computing without coalescing");
        let request = Request::from_parts(parts, body);
        return compute(cache, &key, context, &active, request, next, None).await;
    }

    match cache.coordinator().acquire(&key) {
        Acquired::Leader(guard) => {
            debug!(outcache = "miss", key = %key, "leading computation");
            let request = Request::from_parts(parts, body);
            compute(cache, &key, context, &active, request, next, Some(guard)).await
        }
        Acquired::Follower(waiter) => {
            counter!(METRIC_LOCK_WAIT_TOTAL).increment(1);
            debug!(outcache = "wait", key = %key, "waiting for in-flight computation");
            match waiter.wait().await {
                WaitOutcome::Released(outcome) => {
                    if context.allow_lookup()
                        && let Some(response) = serve_from_store(cache, &key, &parts).await
                    {
                        return response;
                    }
                    debug!(
                        outcache = "wait",
                        key = %key,
                        ?outcome,
                        "nothing stored by leader, computing independently"
                    );
                }
                WaitOutcome::TimedOut => {
                    counter!(METRIC_LOCK_TIMEOUT_TOTAL).increment(1);
                    warn!(
                        outcache = "wait",
                        key = %key,
                        timeout_ms = cache.config().lock_timeout_ms,
                        "timed out waiting for in-flight computation"
                    );
                }
            }
            let request = Request::from_parts(parts, body);
            compute(cache, &key, context, &active, request, next, None).await
        }
    }
}

/// Answer from the store when it holds a usable entry for `key`.
async fn serve_from_store(
    cache: &OutputCache,
    key: &CacheKey,
    request: &Parts,
) -> Option<Response> {
    let entry = match cache.store().get(key).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(error) => {
            warn!(
                outcache = "lookup",
                key = %key,
                error = %error,
                "store read failed, treating as miss"
            );
            return None;
        }
    };

    let now = OffsetDateTime::now_utc();
    match freshness::evaluate(&entry, &request.method, &request.headers, now) {
        Freshness::FreshHit => {
            counter!(METRIC_HIT_TOTAL).increment(1);
            debug!(outcache = "hit", key = %key, "serving stored response");
            let head = request.method == Method::HEAD;
            Some(replay(&entry, entry.age_seconds(now), head))
        }
        Freshness::NotModified => {
            counter!(METRIC_NOT_MODIFIED_TOTAL).increment(1);
            debug!(outcache = "not_modified", key = %key, "validators match");
            Some(not_modified(&entry))
        }
        Freshness::Stale => {
            debug!(outcache = "stale", key = %key, "stored response expired");
            None
        }
    }
}

/// Run the handler and store its response when allowed.
///
/// The leader's guard, if any, is released only after the store write.
async fn compute(
    cache: &OutputCache,
    key: &CacheKey,
    mut context: CacheContext,
    active: &ActivePolicies,
    request: Request<Body>,
    next: Next,
    guard: Option<FlightGuard>,
) -> Response {
    let is_get = request.method() == Method::GET;
    let response = next.run(request).await;

    active.on_response(
        &mut context,
        &ResponseDescriptor {
            status: response.status(),
            headers: response.headers(),
        },
    );

    if !is_get || !context.may_store() || response_forbids_storage(response.headers()) {
        release(guard, FlightState::Failed);
        return response;
    }

    let limit = cache.config().max_body_bytes;
    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|length| length > limit) {
        debug!(outcache = "skip", key = %key, limit, "body exceeds storage limit");
        release(guard, FlightState::Failed);
        return response;
    }

    let (response, captured) = match buffer_response(response, limit).await {
        Ok(Buffered::Complete(response, captured)) => (response, captured),
        Ok(Buffered::TooLarge(response)) => {
            debug!(outcache = "skip", key = %key, limit, "body exceeds storage limit");
            release(guard, FlightState::Failed);
            return response;
        }
        Err((response, error)) => {
            warn!(outcache = "store", key = %key, error = %error, "failed to capture response");
            release(guard, FlightState::Failed);
            return response;
        }
    };

    let entry = CacheEntry::new(
        captured.status,
        captured.headers,
        captured.body,
        OffsetDateTime::now_utc(),
        context.expiration(),
    )
    .with_sliding(context.sliding())
    .with_tags(context.tags().iter().cloned());

    let outcome = match cache.store().set(key.clone(), entry).await {
        Ok(()) => {
            counter!(METRIC_STORE_TOTAL).increment(1);
            debug!(outcache = "store", key = %key, "stored response");
            FlightState::Completed
        }
        Err(error) => {
            warn!(outcache = "store", key = %key, error = %error, "store write failed");
            FlightState::Failed
        }
    };
    release(guard, outcome);
    response
}

fn release(guard: Option<FlightGuard>, outcome: FlightState) {
    if let Some(guard) = guard {
        guard.release(outcome);
    }
}
