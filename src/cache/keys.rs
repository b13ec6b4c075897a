//! Cache key construction.
//!
//! A [`CacheKey`] is a SHA-256 digest over the request method, the path and
//! every dimension named by the active [`VaryRules`]. Each dimension is sorted
//! by name and every component is length-prefixed, so parameter order never
//! matters and distinct inputs cannot collide by concatenation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use axum::http::{Extensions, HeaderMap, HeaderName, Method, Request, Uri, request::Parts};
use sha2::{Digest, Sha256};

use super::error::KeyError;

/// Query rule name that varies by every query parameter present.
pub const ANY_QUERY: &str = "*";

const SECTION_QUERY: u8 = b'Q';
const SECTION_HEADER: u8 = b'H';
const SECTION_VALUE: u8 = b'V';
const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Opaque identifier of one cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Wrap an externally produced key, e.g. one read back from a store.
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only view of the request attributes the cache consults.
#[derive(Clone, Copy)]
pub struct RequestDescriptor<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    /// Request-scoped state inserted by earlier layers (e.g. a parsed culture).
    pub extensions: &'a Extensions,
}

impl<'a> RequestDescriptor<'a> {
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        Self {
            method: request.method(),
            uri: request.uri(),
            headers: request.headers(),
            extensions: request.extensions(),
        }
    }

    pub fn from_parts(parts: &'a Parts) -> Self {
        Self {
            method: &parts.method,
            uri: &parts.uri,
            headers: &parts.headers,
            extensions: &parts.extensions,
        }
    }

    pub fn path(&self) -> &'a str {
        self.uri.path()
    }

    /// Decoded query pairs in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

type ValueFn = dyn Fn(&RequestDescriptor<'_>) -> Result<String, String> + Send + Sync;

/// A caller-supplied key dimension computed from the request.
#[derive(Clone)]
pub struct VaryByValue {
    name: Arc<str>,
    compute: Arc<ValueFn>,
}

impl VaryByValue {
    pub fn new<F>(name: impl Into<Arc<str>>, compute: F) -> Self
    where
        F: Fn(&RequestDescriptor<'_>) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, request: &RequestDescriptor<'_>) -> Result<String, KeyError> {
        (self.compute)(request).map_err(|message| KeyError::VaryByValue {
            name: self.name.to_string(),
            message,
        })
    }
}

impl fmt::Debug for VaryByValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaryByValue")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Dimensions accumulated by the policy chain for one request.
#[derive(Debug, Clone, Default)]
pub struct VaryRules {
    query: BTreeSet<String>,
    headers: BTreeSet<String>,
    values: Vec<VaryByValue>,
}

impl VaryRules {
    /// Query names are matched case-insensitively.
    pub fn add_query(&mut self, name: &str) {
        self.query.insert(name.to_ascii_lowercase());
    }

    pub fn add_header(&mut self, name: &HeaderName) {
        self.headers.insert(name.as_str().to_string());
    }

    pub fn add_value(&mut self, value: VaryByValue) {
        self.values.push(value);
    }

    pub fn query(&self) -> impl Iterator<Item = &str> {
        self.query.iter().map(String::as_str)
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.headers.is_empty() && self.values.is_empty()
    }
}

/// Derive the cache key for `request` under `rules`.
///
/// HEAD shares the GET key so HEAD requests are answered from GET entries.
/// Dimensions without a rule are left out of the digest entirely.
pub fn build_key(request: &RequestDescriptor<'_>, rules: &VaryRules) -> Result<CacheKey, KeyError> {
    let mut hasher = Sha256::new();

    let method = if *request.method == Method::HEAD {
        Method::GET
    } else {
        request.method.clone()
    };
    write_component(&mut hasher, method.as_str().as_bytes());
    write_component(&mut hasher, request.path().as_bytes());

    if !rules.query.is_empty() {
        hasher.update([SECTION_QUERY]);
        let mut present: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in request.query_pairs() {
            present
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value);
        }

        let names: Vec<&str> = if rules.query.contains(ANY_QUERY) {
            present.keys().map(String::as_str).collect()
        } else {
            rules.query().collect()
        };

        for name in names {
            write_dimension(
                &mut hasher,
                name,
                present.get(name).map(|values| values.iter().map(String::as_bytes)),
            );
        }
    }

    if !rules.headers.is_empty() {
        hasher.update([SECTION_HEADER]);
        for name in rules.headers() {
            let values = request.headers.get_all(name);
            let present = values.iter().next().is_some();
            write_dimension(
                &mut hasher,
                name,
                present.then(|| values.iter().map(|value| value.as_bytes())),
            );
        }
    }

    if !rules.values.is_empty() {
        hasher.update([SECTION_VALUE]);
        let mut computed = Vec::with_capacity(rules.values.len());
        for rule in &rules.values {
            computed.push((rule.name(), rule.evaluate(request)?));
        }
        computed.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in &computed {
            write_dimension(&mut hasher, name, Some(std::iter::once(value.as_bytes())));
        }
    }

    Ok(CacheKey::from_raw(hex::encode(hasher.finalize())))
}

fn write_dimension<'v, I>(hasher: &mut Sha256, name: &str, values: Option<I>)
where
    I: Iterator<Item = &'v [u8]>,
{
    write_component(hasher, name.as_bytes());
    match values {
        Some(values) => {
            hasher.update([PRESENT]);
            for value in values {
                write_component(hasher, value);
            }
        }
        None => hasher.update([ABSENT]),
    }
}

fn write_component(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::ACCEPT_LANGUAGE;

    use super::*;

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build")
    }

    fn key(request: &Request<Body>, rules: &VaryRules) -> CacheKey {
        build_key(&RequestDescriptor::from_request(request), rules).expect("key should build")
    }

    fn query_rules(names: &[&str]) -> VaryRules {
        let mut rules = VaryRules::default();
        for name in names {
            rules.add_query(name);
        }
        rules
    }

    #[test]
    fn unlisted_query_parameters_are_ignored() {
        let rules = query_rules(&["culture"]);
        let plain = request(Method::GET, "/query?culture=en");
        let noisy = request(Method::GET, "/query?culture=en&unused=1");
        assert_eq!(key(&plain, &rules), key(&noisy, &rules));
    }

    #[test]
    fn query_order_does_not_matter() {
        let rules = query_rules(&["a", "b"]);
        let first = request(Method::GET, "/q?b=2&a=1");
        let second = request(Method::GET, "/q?a=1&b=2");
        assert_eq!(key(&first, &rules), key(&second, &rules));
    }

    #[test]
    fn varied_query_value_changes_key() {
        let rules = query_rules(&["culture"]);
        let en = request(Method::GET, "/query?culture=en");
        let fr = request(Method::GET, "/query?culture=fr");
        assert_ne!(key(&en, &rules), key(&fr, &rules));
    }

    #[test]
    fn absent_and_empty_parameters_differ() {
        let rules = query_rules(&["culture"]);
        let absent = request(Method::GET, "/query");
        let empty = request(Method::GET, "/query?culture=");
        assert_ne!(key(&absent, &rules), key(&empty, &rules));
    }

    #[test]
    fn query_without_rule_is_not_part_of_key() {
        let rules = VaryRules::default();
        let bare = request(Method::GET, "/query");
        let with_query = request(Method::GET, "/query?culture=en");
        assert_eq!(key(&bare, &rules), key(&with_query, &rules));
    }

    #[test]
    fn query_names_match_case_insensitively() {
        let rules = query_rules(&["Culture"]);
        let lower = request(Method::GET, "/query?culture=en");
        let upper = request(Method::GET, "/query?CULTURE=en");
        assert_eq!(key(&lower, &rules), key(&upper, &rules));
    }

    #[test]
    fn wildcard_varies_by_every_parameter() {
        let rules = query_rules(&[ANY_QUERY]);
        let one = request(Method::GET, "/q?a=1");
        let two = request(Method::GET, "/q?a=1&b=2");
        let reordered = request(Method::GET, "/q?b=2&a=1");
        assert_ne!(key(&one, &rules), key(&two, &rules));
        assert_eq!(key(&two, &rules), key(&reordered, &rules));
    }

    #[test]
    fn percent_encoding_is_decoded_before_hashing() {
        let rules = query_rules(&["q"]);
        let upper = request(Method::GET, "/search?q=caf%C3%A9");
        let lower = request(Method::GET, "/search?q=caf%c3%a9");
        assert_eq!(key(&upper, &rules), key(&lower, &rules));

        let plus = request(Method::GET, "/search?q=a+b");
        let space = request(Method::GET, "/search?q=a%20b");
        assert_eq!(key(&plus, &rules), key(&space, &rules));
    }

    #[test]
    fn head_shares_get_key_but_post_does_not() {
        let rules = VaryRules::default();
        let get = request(Method::GET, "/");
        let head = request(Method::HEAD, "/");
        let post = request(Method::POST, "/");
        assert_eq!(key(&get, &rules), key(&head, &rules));
        assert_ne!(key(&get, &rules), key(&post, &rules));
    }

    #[test]
    fn different_paths_differ() {
        let rules = VaryRules::default();
        assert_ne!(
            key(&request(Method::GET, "/a"), &rules),
            key(&request(Method::GET, "/b"), &rules)
        );
    }

    #[test]
    fn varied_header_changes_key() {
        let mut rules = VaryRules::default();
        rules.add_header(&ACCEPT_LANGUAGE);

        let build = |language: &str| {
            Request::builder()
                .uri("/")
                .header(ACCEPT_LANGUAGE, language)
                .body(Body::empty())
                .expect("request should build")
        };

        assert_ne!(key(&build("en"), &rules), key(&build("fr"), &rules));
        assert_eq!(key(&build("en"), &rules), key(&build("en"), &rules));
    }

    #[test]
    fn vary_by_value_reads_request_extensions() {
        #[derive(Clone)]
        struct Culture(&'static str);

        let mut rules = VaryRules::default();
        rules.add_value(VaryByValue::new("culture", |request| {
            Ok(request
                .extensions
                .get::<Culture>()
                .map(|culture| culture.0.to_string())
                .unwrap_or_default())
        }));

        let mut en = request(Method::GET, "/");
        en.extensions_mut().insert(Culture("en"));
        let mut fr = request(Method::GET, "/");
        fr.extensions_mut().insert(Culture("fr"));

        assert_ne!(key(&en, &rules), key(&fr, &rules));
    }

    #[test]
    fn vary_by_value_order_does_not_matter() {
        let a = VaryByValue::new("a", |_| Ok("1".to_string()));
        let b = VaryByValue::new("b", |_| Ok("2".to_string()));

        let mut forward = VaryRules::default();
        forward.add_value(a.clone());
        forward.add_value(b.clone());
        let mut backward = VaryRules::default();
        backward.add_value(b);
        backward.add_value(a);

        let req = request(Method::GET, "/");
        assert_eq!(key(&req, &forward), key(&req, &backward));
    }

    #[test]
    fn failing_vary_by_value_reports_error() {
        let mut rules = VaryRules::default();
        rules.add_value(VaryByValue::new("broken", |_| Err("no culture".to_string())));

        let req = request(Method::GET, "/");
        let err = build_key(&RequestDescriptor::from_request(&req), &rules)
            .expect_err("callback failure should surface");
        assert!(matches!(err, KeyError::VaryByValue { ref name, .. } if name == "broken"));
    }

    #[test]
    fn key_is_hex_digest() {
        let req = request(Method::GET, "/");
        let key = key(&req, &VaryRules::default());
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
