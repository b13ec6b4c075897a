//! Freshness and conditional-request validation for stored entries.

use axum::http::{
    HeaderMap, HeaderValue, Method,
    header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED},
};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::store::CacheEntry;

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// How a found entry answers the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    FreshHit,
    NotModified,
    Stale,
}

/// Classify `entry` against the request's method and conditional headers.
pub fn evaluate(
    entry: &CacheEntry,
    method: &Method,
    headers: &HeaderMap,
    now: OffsetDateTime,
) -> Freshness {
    if entry.is_expired(now) {
        return Freshness::Stale;
    }
    if *method != Method::GET && *method != Method::HEAD {
        return Freshness::FreshHit;
    }

    if headers.contains_key(IF_NONE_MATCH) {
        let stored = entry.headers.get(ETAG).and_then(|value| value.to_str().ok());
        return match stored {
            Some(etag) if if_none_match_hits(headers, etag) => Freshness::NotModified,
            _ => Freshness::FreshHit,
        };
    }

    let since = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date);
    if let Some(since) = since {
        let modified = entry
            .headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .unwrap_or(entry.created_at);
        if modified.unix_timestamp() <= since.unix_timestamp() {
            return Freshness::NotModified;
        }
    }

    Freshness::FreshHit
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// The subset of `Cache-Control` directives that affects storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<u64>,
}

impl CacheControl {
    pub fn parse(value: &str) -> Self {
        let mut parsed = Self::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, argument) = match directive.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "public" => parsed.public = true,
                "private" => parsed.private = true,
                "no-store" => parsed.no_store = true,
                "no-cache" => parsed.no_cache = true,
                "max-age" => parsed.max_age = argument.and_then(|age| age.parse().ok()),
                _ => {}
            }
        }
        parsed
    }

    /// Merge every `Cache-Control` header in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(Self::parse)
            .fold(Self::default(), |acc, next| Self {
                public: acc.public || next.public,
                private: acc.private || next.private,
                no_store: acc.no_store || next.no_store,
                no_cache: acc.no_cache || next.no_cache,
                max_age: acc.max_age.or(next.max_age),
            })
    }
}

/// True when the response itself says it must not be kept by a shared cache.
pub fn response_forbids_storage(headers: &HeaderMap) -> bool {
    let directives = CacheControl::from_headers(headers);
    directives.no_store || directives.private
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

pub fn format_http_date(moment: OffsetDateTime) -> Option<HeaderValue> {
    let formatted = moment.to_offset(UtcOffset::UTC).format(HTTP_DATE).ok()?;
    HeaderValue::from_str(&formatted).ok()
}
