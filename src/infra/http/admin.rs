use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;

use crate::cache::{CacheKey, OutputCache};

use super::middleware::log_responses;

#[derive(Clone)]
pub struct AdminState {
    pub cache: OutputCache,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_health", get(admin_health))
        .route("/admin/cache", get(cache_status))
        .route("/admin/cache/tags/{tag}", post(evict_tag))
        .route("/admin/cache/keys/{key}", delete(evict_key))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
}

async fn admin_health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn cache_status(State(state): State<AdminState>) -> Response {
    let cache = &state.cache;
    let mut profiles: Vec<&str> = cache.profiles().names().collect();
    profiles.sort_unstable();
    Json(json!({
        "enabled": cache.config().enabled,
        "locking": cache.config().locking,
        "default_expiration_secs": cache.config().default_expiration_secs,
        "profiles": profiles,
        "in_flight": cache.coordinator().len(),
    }))
    .into_response()
}

async fn evict_tag(State(state): State<AdminState>, Path(tag): Path<String>) -> Response {
    state.cache.evict_by_tag(&tag).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn evict_key(State(state): State<AdminState>, Path(key): Path<String>) -> Response {
    state.cache.evict(&CacheKey::from_raw(key)).await;
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{body::Body, http::Request};
    use bytes::Bytes;
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, CacheEntry, CacheStore, MemoryStore};

    #[tokio::test]
    async fn tag_eviction_endpoint_returns_no_content() {
        let store = std::sync::Arc::new(MemoryStore::new(&CacheConfig::default()));
        let cache = OutputCache::builder(CacheConfig::default())
            .store(store.clone())
            .build()
            .expect("cache builds");
        let entry = CacheEntry::new(
            StatusCode::OK,
            Default::default(),
            Bytes::from_static(b"x"),
            OffsetDateTime::now_utc(),
            Duration::from_secs(60),
        )
        .with_tags(["home"]);
        store
            .set(CacheKey::from_raw("k"), entry)
            .await
            .expect("store write");

        let app = build_admin_router(AdminState { cache });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/cache/tags/home")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn status_lists_profiles() {
        let cache = OutputCache::builder(CacheConfig::default())
            .profile("Expire20", crate::cache::PolicyBuilder::empty())
            .build()
            .expect("cache builds");
        let app = build_admin_router(AdminState { cache });
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/cache")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .expect("body collects")
            .to_bytes();
        let status: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(status["profiles"], json!(["Expire20"]));
        assert_eq!(status["in_flight"], json!(0));
    }

    #[tokio::test]
    async fn unknown_tag_still_succeeds() {
        let cache = OutputCache::builder(CacheConfig::default())
            .build()
            .expect("cache builds");
        let app = build_admin_router(AdminState { cache });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/cache/tags/nothing")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
