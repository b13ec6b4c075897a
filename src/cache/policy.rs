//! Policy chain.
//!
//! A [`PolicyChain`] is an ordered list of [`Policy`] objects evaluated against
//! a per-request [`CacheContext`]. Chains are assembled with a
//! [`PolicyBuilder`]; profile references are resolved and spliced in place when
//! the builder is built, so request handling never looks anything up by name.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{
    HeaderMap, HeaderName, Method, StatusCode,
    header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA, SET_COOKIE},
};

use super::config::{CacheConfig, ProfileConfig};
use super::error::CacheError;
use super::freshness::CacheControl;
use super::keys::{RequestDescriptor, VaryByValue, VaryRules};
use super::profile::ProfileRegistry;

/// Outcome of the enable/disable votes cast so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// No policy has voted; treated as "do not cache".
    Undecided,
    Enabled,
    /// Terminal: later policies cannot re-enable caching.
    Disabled,
}

/// Mutable caching state threaded through the chain for one request.
#[derive(Debug, Clone)]
pub struct CacheContext {
    decision: CacheDecision,
    allow_lookup: bool,
    allow_storage: bool,
    allow_locking: bool,
    expiration: Duration,
    sliding: Option<Duration>,
    tags: BTreeSet<String>,
    vary: VaryRules,
}

impl CacheContext {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            decision: CacheDecision::Undecided,
            allow_lookup: true,
            allow_storage: true,
            allow_locking: config.locking,
            expiration: config.default_expiration(),
            sliding: None,
            tags: BTreeSet::new(),
            vary: VaryRules::default(),
        }
    }

    /// Vote for caching. Has no effect once caching was disabled.
    pub fn enable(&mut self) {
        if self.decision == CacheDecision::Undecided {
            self.decision = CacheDecision::Enabled;
        }
    }

    pub fn disable(&mut self) {
        self.decision = CacheDecision::Disabled;
    }

    pub fn decision(&self) -> CacheDecision {
        self.decision
    }

    pub fn is_enabled(&self) -> bool {
        self.decision == CacheDecision::Enabled
    }

    /// Skip the store read; the computed response still replaces the entry.
    pub fn disable_lookup(&mut self) {
        self.allow_lookup = false;
    }

    pub fn allow_lookup(&self) -> bool {
        self.allow_lookup
    }

    pub fn disable_storage(&mut self) {
        self.allow_storage = false;
    }

    /// Whether a computed response may be written to the store.
    pub fn may_store(&self) -> bool {
        self.is_enabled() && self.allow_storage
    }

    pub fn set_locking(&mut self, enabled: bool) {
        self.allow_locking = enabled;
    }

    pub fn allow_locking(&self) -> bool {
        self.allow_locking
    }

    pub fn set_expiration(&mut self, expiration: Duration) {
        self.expiration = expiration;
    }

    /// Narrow the freshness window; a longer value is ignored.
    pub fn shorten_expiration(&mut self, expiration: Duration) {
        self.expiration = self.expiration.min(expiration);
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn set_sliding(&mut self, window: Duration) {
        self.sliding = Some(window);
    }

    pub fn sliding(&self) -> Option<Duration> {
        self.sliding
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn vary(&self) -> &VaryRules {
        &self.vary
    }

    pub fn vary_mut(&mut self) -> &mut VaryRules {
        &mut self.vary
    }
}

/// What the response phase of a policy may inspect.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDescriptor<'a> {
    pub status: StatusCode,
    pub headers: &'a HeaderMap,
}

/// A composable caching decision unit.
///
/// `on_request` runs before the key is built and the handler executes;
/// `on_response` runs after the handler, before anything is stored.
pub trait Policy: Send + Sync + fmt::Debug {
    fn on_request(&self, _context: &mut CacheContext, _request: &RequestDescriptor<'_>) {}

    fn on_response(&self, _context: &mut CacheContext, _response: &ResponseDescriptor<'_>) {}
}

type RequestPredicate = Arc<dyn Fn(&RequestDescriptor<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
enum Step {
    Policy(Arc<dyn Policy>),
    When {
        predicate: RequestPredicate,
        chain: PolicyChain,
    },
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(policy) => fmt::Debug::fmt(policy, f),
            Self::When { chain, .. } => f.debug_struct("When").field("chain", chain).finish(),
        }
    }
}

/// A resolved, immutable sequence of policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyChain {
    steps: Vec<Step>,
}

/// Policies that took part in the request phase; their response hooks run
/// after the handler.
#[derive(Debug, Default)]
pub struct ActivePolicies(Vec<Arc<dyn Policy>>);

impl ActivePolicies {
    pub fn on_response(&self, context: &mut CacheContext, response: &ResponseDescriptor<'_>) {
        for policy in &self.0 {
            policy.on_response(context, response);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PolicyChain {
    /// Run the request phase and return the policies whose response phase applies.
    pub fn on_request(
        &self,
        context: &mut CacheContext,
        request: &RequestDescriptor<'_>,
    ) -> ActivePolicies {
        let mut active = ActivePolicies::default();
        self.collect(context, request, &mut active);
        active
    }

    fn collect(
        &self,
        context: &mut CacheContext,
        request: &RequestDescriptor<'_>,
        active: &mut ActivePolicies,
    ) {
        for step in &self.steps {
            match step {
                Step::Policy(policy) => {
                    policy.on_request(context, request);
                    active.0.push(Arc::clone(policy));
                }
                Step::When { predicate, chain } => {
                    if predicate(request) {
                        chain.collect(context, request, active);
                    }
                }
            }
        }
    }

    /// `self` followed by `other`.
    pub fn then(&self, other: &PolicyChain) -> PolicyChain {
        let mut steps = self.steps.clone();
        steps.extend(other.steps.iter().cloned());
        PolicyChain { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Clone)]
enum PendingStep {
    Policy(Arc<dyn Policy>),
    Profile(String),
    When {
        predicate: RequestPredicate,
        builder: PolicyBuilder,
    },
}

/// Fluent assembly of a [`PolicyChain`].
///
/// [`PolicyBuilder::new`] starts with [`DefaultPolicy`]; [`PolicyBuilder::empty`]
/// starts with nothing, which is what profiles and base policies usually want.
#[derive(Clone, Default)]
pub struct PolicyBuilder {
    steps: Vec<PendingStep>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::empty().with(DefaultPolicy)
    }

    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append any policy.
    pub fn with<P: Policy + 'static>(mut self, policy: P) -> Self {
        self.steps.push(PendingStep::Policy(Arc::new(policy)));
        self
    }

    /// Splice the named profile in at this position.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.steps.push(PendingStep::Profile(name.into()));
        self
    }

    /// Apply `builder` only to requests matching `predicate`.
    pub fn when<F>(mut self, predicate: F, builder: PolicyBuilder) -> Self
    where
        F: Fn(&RequestDescriptor<'_>) -> bool + Send + Sync + 'static,
    {
        self.steps.push(PendingStep::When {
            predicate: Arc::new(predicate),
            builder,
        });
        self
    }

    pub fn cache(self) -> Self {
        self.with(EnableCache)
    }

    pub fn no_cache(self) -> Self {
        self.with(NoCache)
    }

    pub fn no_store(self) -> Self {
        self.with(NoStore)
    }

    pub fn vary_by_query<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(VaryByQuery::new(names))
    }

    pub fn vary_by_header<I>(self, names: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        self.with(VaryByHeader::new(names))
    }

    pub fn vary_by_value(self, value: VaryByValue) -> Self {
        self.with(VaryByValuePolicy(value))
    }

    pub fn tag<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Tags::new(tags))
    }

    pub fn expire(self, expiration: Duration) -> Self {
        self.with(Expire(expiration))
    }

    pub fn shorten_expiry(self, expiration: Duration) -> Self {
        self.with(ShortenExpiry(expiration))
    }

    pub fn sliding_expiry(self, window: Duration) -> Self {
        self.with(SlidingExpiry(window))
    }

    pub fn locking(self, enabled: bool) -> Self {
        self.with(Locking(enabled))
    }

    pub fn skip_path(self, prefix: impl Into<String>) -> Self {
        self.with(SkipPath::new(prefix))
    }

    pub fn statuses<I>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.with(StatusCodes::new(statuses))
    }

    pub fn require_public(self) -> Self {
        self.with(RequirePublic)
    }

    pub fn refresh_on_request_no_cache(self) -> Self {
        self.with(RefreshOnRequestNoCache)
    }

    /// Resolve profile references against `profiles` and freeze the chain.
    pub fn build(self, profiles: &ProfileRegistry) -> Result<PolicyChain, CacheError> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in self.steps {
            match step {
                PendingStep::Policy(policy) => steps.push(Step::Policy(policy)),
                PendingStep::Profile(name) => {
                    steps.extend(profiles.get(&name)?.steps.iter().cloned());
                }
                PendingStep::When { predicate, builder } => steps.push(Step::When {
                    predicate,
                    chain: builder.build(profiles)?,
                }),
            }
        }
        Ok(PolicyChain { steps })
    }

    /// Translate a `[cache.profiles.<name>]` table into a builder.
    pub fn from_profile_config(config: &ProfileConfig) -> Result<Self, CacheError> {
        let mut builder = Self::empty().cache();
        if config.no_cache {
            builder = builder.no_cache();
        }
        if config.no_store {
            builder = builder.no_store();
        }
        if let Some(seconds) = config.expire_seconds {
            builder = builder.expire(Duration::from_secs(seconds));
        }
        if !config.vary_by_query.is_empty() {
            builder = builder.vary_by_query(config.vary_by_query.iter().cloned());
        }
        if !config.vary_by_header.is_empty() {
            let mut headers = Vec::with_capacity(config.vary_by_header.len());
            for name in &config.vary_by_header {
                let header = HeaderName::try_from(name.as_str()).map_err(|err| {
                    CacheError::invalid_policy(format!("invalid header name `{name}`: {err}"))
                })?;
                headers.push(header);
            }
            builder = builder.vary_by_header(headers);
        }
        if !config.tags.is_empty() {
            builder = builder.tag(config.tags.iter().cloned());
        }
        if let Some(locking) = config.locking {
            builder = builder.locking(locking);
        }
        Ok(builder)
    }
}

// ============================================================================
// Built-in policies
// ============================================================================

/// Standard request and response checks.
///
/// Enables caching for GET/HEAD requests without `Authorization`; forbids
/// storage unless the response is a 200 without `Set-Cookie`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl Policy for DefaultPolicy {
    fn on_request(&self, context: &mut CacheContext, request: &RequestDescriptor<'_>) {
        let method_ok = *request.method == Method::GET || *request.method == Method::HEAD;
        if method_ok && !request.headers.contains_key(AUTHORIZATION) {
            context.enable();
        } else {
            context.disable();
        }
    }

    fn on_response(&self, context: &mut CacheContext, response: &ResponseDescriptor<'_>) {
        if response.status != StatusCode::OK || response.headers.contains_key(SET_COOKIE) {
            context.disable_storage();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnableCache;

impl Policy for EnableCache {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.enable();
    }
}

/// Disables caching outright; nothing later in the chain can undo it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Policy for NoCache {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.disable();
    }
}

/// Entries may still be served, but responses are never written.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStore;

impl Policy for NoStore {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.disable_storage();
    }
}

#[derive(Debug, Clone)]
pub struct VaryByQuery(Vec<String>);

impl VaryByQuery {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl Policy for VaryByQuery {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        for name in &self.0 {
            context.vary_mut().add_query(name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaryByHeader(Vec<HeaderName>);

impl VaryByHeader {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        Self(names.into_iter().collect())
    }
}

impl Policy for VaryByHeader {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        for name in &self.0 {
            context.vary_mut().add_header(name);
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaryByValuePolicy(pub VaryByValue);

impl Policy for VaryByValuePolicy {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.vary_mut().add_value(self.0.clone());
    }
}

#[derive(Debug, Clone)]
pub struct Tags(Vec<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }
}

impl Policy for Tags {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        for tag in &self.0 {
            context.add_tag(tag.clone());
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Expire(pub Duration);

impl Policy for Expire {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.set_expiration(self.0);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShortenExpiry(pub Duration);

impl Policy for ShortenExpiry {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.shorten_expiration(self.0);
    }
}

/// Each hit pushes the entry's expiry `window` into the future.
#[derive(Debug, Clone, Copy)]
pub struct SlidingExpiry(pub Duration);

impl Policy for SlidingExpiry {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.set_sliding(self.0);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Locking(pub bool);

impl Policy for Locking {
    fn on_request(&self, context: &mut CacheContext, _request: &RequestDescriptor<'_>) {
        context.set_locking(self.0);
    }
}

/// Disables caching for every path under `prefix`.
#[derive(Debug, Clone)]
pub struct SkipPath(String);

impl SkipPath {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }
}

impl Policy for SkipPath {
    fn on_request(&self, context: &mut CacheContext, request: &RequestDescriptor<'_>) {
        if request.path().starts_with(&self.0) {
            context.disable();
        }
    }
}

/// Stores only responses whose status is in the set.
#[derive(Debug, Clone)]
pub struct StatusCodes(BTreeSet<u16>);

impl StatusCodes {
    pub fn new<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        Self(statuses.into_iter().map(|status| status.as_u16()).collect())
    }
}

impl Policy for StatusCodes {
    fn on_response(&self, context: &mut CacheContext, response: &ResponseDescriptor<'_>) {
        if !self.0.contains(&response.status.as_u16()) {
            context.disable_storage();
        }
    }
}

/// Stores only responses that carry `Cache-Control: public`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirePublic;

impl Policy for RequirePublic {
    fn on_response(&self, context: &mut CacheContext, response: &ResponseDescriptor<'_>) {
        let public = response
            .headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| CacheControl::parse(value).public);
        if !public {
            context.disable_storage();
        }
    }
}

/// Recomputes instead of reading the store when the client asks for a fresh
/// copy (`Cache-Control: no-cache`, `max-age=0`, or `Pragma: no-cache`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOnRequestNoCache;

impl Policy for RefreshOnRequestNoCache {
    fn on_request(&self, context: &mut CacheContext, request: &RequestDescriptor<'_>) {
        let directive = CacheControl::from_headers(request.headers);
        let pragma = request
            .headers
            .get_all(PRAGMA)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.trim().eq_ignore_ascii_case("no-cache"));
        if directive.no_cache || directive.max_age == Some(0) || pragma {
            context.disable_lookup();
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, header::ACCEPT_LANGUAGE};

    use super::*;

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request should build")
    }

    fn evaluate(chain: &PolicyChain, request: &Request<Body>) -> (CacheContext, ActivePolicies) {
        let mut context = CacheContext::new(&CacheConfig::default());
        let active = chain.on_request(&mut context, &RequestDescriptor::from_request(request));
        (context, active)
    }

    fn build(builder: PolicyBuilder) -> PolicyChain {
        builder
            .build(&ProfileRegistry::default())
            .expect("chain should build")
    }

    #[test]
    fn undecided_context_does_not_cache() {
        let (context, _) = evaluate(&build(PolicyBuilder::empty()), &get("/"));
        assert_eq!(context.decision(), CacheDecision::Undecided);
        assert!(!context.is_enabled());
        assert!(!context.may_store());
    }

    #[test]
    fn default_policy_enables_get() {
        let (context, _) = evaluate(&build(PolicyBuilder::new()), &get("/"));
        assert!(context.is_enabled());
    }

    #[test]
    fn default_policy_rejects_post_and_authorized_requests() {
        let chain = build(PolicyBuilder::new());

        let post = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .expect("request should build");
        assert!(!evaluate(&chain, &post).0.is_enabled());

        let authorized = Request::builder()
            .uri("/")
            .header(AUTHORIZATION, "Bearer token")
            .body(Body::empty())
            .expect("request should build");
        assert!(!evaluate(&chain, &authorized).0.is_enabled());
    }

    #[test]
    fn disable_wins_over_later_enable() {
        let chain = build(PolicyBuilder::empty().no_cache().cache());
        let (context, _) = evaluate(&chain, &get("/"));
        assert_eq!(context.decision(), CacheDecision::Disabled);
    }

    #[test]
    fn disable_wins_over_earlier_enable() {
        let chain = build(PolicyBuilder::new().no_cache());
        assert!(!evaluate(&chain, &get("/")).0.is_enabled());
    }

    #[test]
    fn skip_path_disables_matching_requests_only() {
        let chain = build(PolicyBuilder::new().skip_path("/nocache"));
        assert!(!evaluate(&chain, &get("/nocache")).0.is_enabled());
        assert!(evaluate(&chain, &get("/cached")).0.is_enabled());
    }

    #[test]
    fn rules_and_tags_accumulate() {
        let chain = build(
            PolicyBuilder::new()
                .vary_by_query(["culture"])
                .vary_by_header([ACCEPT_LANGUAGE])
                .tag(["home", "pages"])
                .tag(["home"]),
        );
        let (context, _) = evaluate(&chain, &get("/"));
        assert_eq!(context.vary().query().collect::<Vec<_>>(), vec!["culture"]);
        assert_eq!(
            context.vary().headers().collect::<Vec<_>>(),
            vec!["accept-language"]
        );
        assert_eq!(
            context.tags().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["home", "pages"]
        );
    }

    #[test]
    fn shorten_never_extends() {
        let chain = build(
            PolicyBuilder::new()
                .expire(Duration::from_secs(10))
                .shorten_expiry(Duration::from_secs(30)),
        );
        let (context, _) = evaluate(&chain, &get("/"));
        assert_eq!(context.expiration(), Duration::from_secs(10));

        let chain = build(
            PolicyBuilder::new()
                .expire(Duration::from_secs(30))
                .shorten_expiry(Duration::from_secs(5)),
        );
        let (context, _) = evaluate(&chain, &get("/"));
        assert_eq!(context.expiration(), Duration::from_secs(5));
    }

    #[test]
    fn locking_can_be_turned_off() {
        let chain = build(PolicyBuilder::new().locking(false));
        let (context, _) = evaluate(&chain, &get("/"));
        assert!(!context.allow_locking());
    }

    #[test]
    fn request_no_cache_skips_lookup_but_keeps_storage() {
        let chain = build(PolicyBuilder::new().refresh_on_request_no_cache());
        assert!(evaluate(&chain, &get("/")).0.allow_lookup());

        for (name, value) in [
            (CACHE_CONTROL, "no-cache"),
            (CACHE_CONTROL, "max-age=0"),
            (PRAGMA, "no-cache"),
        ] {
            let request = Request::builder()
                .uri("/")
                .header(name, value)
                .body(Body::empty())
                .expect("request should build");
            let (context, _) = evaluate(&chain, &request);
            assert!(!context.allow_lookup(), "{value} should skip the lookup");
            assert!(context.may_store());
        }
    }

    #[test]
    fn when_applies_only_on_match() {
        let chain = build(PolicyBuilder::new().when(
            |request| request.path() == "/tagged",
            PolicyBuilder::empty().tag(["special"]),
        ));
        assert!(evaluate(&chain, &get("/tagged")).0.tags().contains("special"));
        assert!(evaluate(&chain, &get("/other")).0.tags().is_empty());
    }

    #[test]
    fn response_phase_forbids_non_ok_and_cookies() {
        let chain = build(PolicyBuilder::new());
        let (mut context, active) = evaluate(&chain, &get("/"));
        let headers = HeaderMap::new();
        active.on_response(
            &mut context,
            &ResponseDescriptor {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                headers: &headers,
            },
        );
        assert!(!context.may_store());

        let (mut context, active) = evaluate(&chain, &get("/"));
        let mut headers = HeaderMap::new();
        headers.insert(SET_COOKIE, HeaderValue::from_static("session=1"));
        active.on_response(
            &mut context,
            &ResponseDescriptor {
                status: StatusCode::OK,
                headers: &headers,
            },
        );
        assert!(!context.may_store());
    }

    #[test]
    fn status_codes_extend_what_may_be_stored() {
        let chain = build(
            PolicyBuilder::empty()
                .cache()
                .statuses([StatusCode::OK, StatusCode::NOT_FOUND]),
        );
        let (mut context, active) = evaluate(&chain, &get("/"));
        let headers = HeaderMap::new();
        active.on_response(
            &mut context,
            &ResponseDescriptor {
                status: StatusCode::NOT_FOUND,
                headers: &headers,
            },
        );
        assert!(context.may_store());
    }

    #[test]
    fn require_public_checks_response_directive() {
        let chain = build(PolicyBuilder::new().require_public());

        let (mut context, active) = evaluate(&chain, &get("/"));
        let headers = HeaderMap::new();
        active.on_response(
            &mut context,
            &ResponseDescriptor {
                status: StatusCode::OK,
                headers: &headers,
            },
        );
        assert!(!context.may_store());

        let (mut context, active) = evaluate(&chain, &get("/"));
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
        active.on_response(
            &mut context,
            &ResponseDescriptor {
                status: StatusCode::OK,
                headers: &headers,
            },
        );
        assert!(context.may_store());
    }

    #[test]
    fn profile_config_translates_to_policies() {
        let config = ProfileConfig {
            expire_seconds: Some(20),
            vary_by_query: vec!["culture".to_string()],
            vary_by_header: vec!["accept-language".to_string()],
            tags: vec!["home".to_string()],
            locking: Some(false),
            ..Default::default()
        };
        let chain = build(PolicyBuilder::from_profile_config(&config).expect("valid profile"));
        let (context, _) = evaluate(&chain, &get("/"));
        assert!(context.is_enabled());
        assert_eq!(context.expiration(), Duration::from_secs(20));
        assert!(!context.allow_locking());
        assert!(context.tags().contains("home"));
        assert_eq!(context.vary().query().collect::<Vec<_>>(), vec!["culture"]);
    }

    #[test]
    fn profile_config_rejects_bad_header_names() {
        let config = ProfileConfig {
            vary_by_header: vec!["not a header".to_string()],
            ..Default::default()
        };
        let err = PolicyBuilder::from_profile_config(&config)
            .err()
            .expect("invalid header should fail");
        assert!(matches!(err, CacheError::InvalidPolicy { .. }));
    }

    #[test]
    fn then_concatenates_in_order() {
        let base = build(PolicyBuilder::empty().cache());
        let route = build(PolicyBuilder::empty().no_cache());
        let chain = base.then(&route);
        assert_eq!(chain.len(), 2);
        assert!(!evaluate(&chain, &get("/")).0.is_enabled());
    }
}
