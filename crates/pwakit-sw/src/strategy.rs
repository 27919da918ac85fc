//! Strategy selection and execution.
//!
//! Classification walks an ordered rule table top-down and returns the first rule whose
//! predicate matches. Execution is one of two fallback chains:
//!
//! ```text
//! NetworkFirst: network → cached copy → offline document → network error
//! CacheFirst:   cached copy → network (store on 2xx) → fallback image (images only)
//!               → network error
//! ```

use std::time::Duration;

use pwakit_common::WorkerPolicy;
use pwakit_net::{Destination, Fetcher, NetError, Request, Response, ResponseSource};
use pwakit_store::{CacheEntry, CacheHandle, CacheKey, CacheStorage};
use tracing::{debug, warn};
use url::Url;

use crate::Result;

/// Closed set of caching strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Fetch first, fall back to the cache and then the offline document.
    NetworkFirst,
    /// Serve from the cache, populate it on a miss.
    CacheFirst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::CacheFirst => "cache-first",
        }
    }

    /// Run the strategy for one request.
    pub async fn execute(self, ctx: &StrategyContext<'_>, request: &Request) -> Result<Response> {
        match self {
            Strategy::NetworkFirst => network_first(ctx, request).await,
            Strategy::CacheFirst => cache_first(ctx, request).await,
        }
    }
}

/// Request metadata a rule can match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Top-level navigations and document loads.
    Navigation,
    /// Requests for a resource kind.
    Destination(Destination),
    /// Requests to any of these hosts.
    Hosts(Vec<String>),
    /// Everything.
    Any,
}

impl Predicate {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Predicate::Navigation => request.is_navigation(),
            Predicate::Destination(destination) => request.destination == *destination,
            Predicate::Hosts(hosts) => request
                .url
                .host_str()
                .map(|host| hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
                .unwrap_or(false),
            Predicate::Any => true,
        }
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: &'static str,
    pub predicate: Predicate,
    pub strategy: Strategy,
}

impl Rule {
    pub fn new(name: &'static str, predicate: Predicate, strategy: Strategy) -> Self {
        Self {
            name,
            predicate,
            strategy,
        }
    }
}

/// Rule used when no row matches.
static CATCH_ALL: Rule = Rule {
    name: "default",
    predicate: Predicate::Any,
    strategy: Strategy::CacheFirst,
};

/// Ordered (predicate, strategy) table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Documents network-first; images, fonts and everything else cache-first.
    pub fn for_policy(policy: &WorkerPolicy) -> Self {
        Self::new(vec![
            Rule::new("navigation", Predicate::Navigation, Strategy::NetworkFirst),
            Rule::new(
                "image",
                Predicate::Destination(Destination::Image),
                Strategy::CacheFirst,
            ),
            Rule::new(
                "font-host",
                Predicate::Hosts(policy.font_hosts.clone()),
                Strategy::CacheFirst,
            ),
            Rule::new("default", Predicate::Any, Strategy::CacheFirst),
        ])
    }

    /// First matching rule. Pure: no I/O, no state.
    pub fn classify(&self, request: &Request) -> &Rule {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(request))
            .unwrap_or(&CATCH_ALL)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

/// Everything a strategy needs to run.
pub struct StrategyContext<'a> {
    pub caches: &'a CacheStorage,
    pub handle: &'a CacheHandle,
    pub fetcher: &'a dyn Fetcher,
    pub offline_document: Option<&'a Url>,
    pub fallback_image: Option<&'a Url>,
    pub timeout: Duration,
}

impl StrategyContext<'_> {
    async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(NetError::Timeout(self.timeout)),
        }
    }

    /// Cached response for a key. Store failures count as a miss.
    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        let entry = match self.caches.match_request(self.handle, key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(url = %key.url, error = %e, "Cache read failed");
                return None;
            }
        };

        match entry.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(url = %key.url, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    async fn fallback(&self, url: Option<&Url>) -> Option<Response> {
        let url = url?;
        self.lookup(&CacheKey::get(url))
            .await
            .map(|response| response.with_source(ResponseSource::Fallback))
    }

    /// Store a copy of a successful response.
    async fn store(&self, key: CacheKey, response: &Response) {
        if response.ok() {
            self.caches
                .put(self.handle, CacheEntry::from_response(key, response))
                .await;
        }
    }
}

async fn network_first(ctx: &StrategyContext<'_>, request: &Request) -> Result<Response> {
    let key = CacheKey::for_request(request);

    let error = match ctx.fetch(request).await {
        Ok(response) => {
            ctx.store(key, &response).await;
            return Ok(response);
        }
        Err(e) => e,
    };

    debug!(url = %request.url, error = %error, "Network failed, trying cache");

    if let Some(cached) = ctx.lookup(&key).await {
        return Ok(cached);
    }
    if let Some(offline) = ctx.fallback(ctx.offline_document).await {
        debug!(url = %request.url, "Serving offline document");
        return Ok(offline);
    }

    Err(error.into())
}

async fn cache_first(ctx: &StrategyContext<'_>, request: &Request) -> Result<Response> {
    let key = CacheKey::for_request(request);

    if let Some(cached) = ctx.lookup(&key).await {
        debug!(url = %request.url, "Cache hit");
        return Ok(cached);
    }

    match ctx.fetch(request).await {
        Ok(response) => {
            ctx.store(key, &response).await;
            Ok(response)
        }
        Err(error) => {
            if request.destination == Destination::Image {
                if let Some(fallback) = ctx.fallback(ctx.fallback_image).await {
                    debug!(url = %request.url, "Serving fallback image");
                    return Ok(fallback);
                }
            }
            Err(error.into())
        }
    }
}
