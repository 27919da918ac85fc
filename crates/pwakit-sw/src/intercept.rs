//! Fetch interception: decide whether a request touches the cache at all.
//!
//! The decision is a strict precedence chain that stops at the first match:
//!
//! 1. non-GET method → passthrough
//! 2. URL contains a bypass token → passthrough
//! 3. otherwise → the first matching rule of the strategy table

use http::Method;
use pwakit_common::WorkerPolicy;
use pwakit_net::{BypassList, Request};
use tracing::trace;

use crate::strategy::{Rule, RuleTable};

/// Why a request skipped the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughReason {
    /// Only GET requests are cached.
    NonGetMethod(Method),
    /// The URL contains this bypass token.
    Bypassed(String),
}

/// Outcome of interception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Straight to the network, no cache reads or writes.
    Passthrough(PassthroughReason),
    /// Handle with the strategy of this rule.
    Strategy(&'a Rule),
}

/// Routes every outgoing request.
#[derive(Debug, Clone)]
pub struct Interceptor {
    bypass: BypassList,
    rules: RuleTable,
}

impl Interceptor {
    pub fn new(bypass: BypassList, rules: RuleTable) -> Self {
        Self { bypass, rules }
    }

    /// Bypass list and rule table of a worker policy.
    pub fn from_policy(policy: &WorkerPolicy) -> Self {
        Self::new(
            BypassList::from_tokens(policy.effective_bypass()),
            RuleTable::for_policy(policy),
        )
    }

    pub fn route(&self, request: &Request) -> Route<'_> {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Passthrough: method");
            return Route::Passthrough(PassthroughReason::NonGetMethod(request.method.clone()));
        }

        if let Some(token) = self.bypass.matching(&request.url) {
            return Route::Passthrough(PassthroughReason::Bypassed(token.to_string()));
        }

        Route::Strategy(self.rules.classify(request))
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use bytes::Bytes;
    use pwakit_common::PolicyProfile;
    use url::Url;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn interceptor() -> Interceptor {
        Interceptor::from_policy(&WorkerPolicy::default())
    }

    #[test]
    fn test_non_get_passthrough() {
        let i = interceptor();
        let post = Request::post(url("https://example.com/contact"), Bytes::from_static(b"x"));
        assert_eq!(
            i.route(&post),
            Route::Passthrough(PassthroughReason::NonGetMethod(Method::POST))
        );
    }

    #[test]
    fn test_method_checked_before_bypass() {
        let i = interceptor();
        let post = Request::post(
            url("https://www.google-analytics.com/collect"),
            Bytes::new(),
        );
        assert!(matches!(
            i.route(&post),
            Route::Passthrough(PassthroughReason::NonGetMethod(_))
        ));
    }

    #[test]
    fn test_bypass_tokens() {
        let i = interceptor();
        for u in [
            "https://www.googletagmanager.com/gtag/js?id=G-1",
            "https://connect.facebook.net/en_US/fbevents.js",
            "https://static.cloudflareinsights.com/beacon.min.js",
            "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
            "chrome-extension://abcdef/inject.js",
        ] {
            assert!(
                matches!(
                    i.route(&Request::get(url(u))),
                    Route::Passthrough(PassthroughReason::Bypassed(_))
                ),
                "{u} should bypass"
            );
        }
    }

    #[test]
    fn test_strategy_dispatch() {
        let i = interceptor();
        match i.route(&Request::navigate(url("https://example.com/"))) {
            Route::Strategy(rule) => assert_eq!(rule.strategy, Strategy::NetworkFirst),
            other => panic!("unexpected route {other:?}"),
        }
        match i.route(&Request::get(url("https://example.com/style.css"))) {
            Route::Strategy(rule) => assert_eq!(rule.strategy, Strategy::CacheFirst),
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_extended_profile_bypasses_private_paths() {
        let i = Interceptor::from_policy(&WorkerPolicy::for_profile(PolicyProfile::Extended));
        assert!(matches!(
            i.route(&Request::get(url("https://example.com/admin/panel"))),
            Route::Passthrough(_)
        ));
        assert!(matches!(
            i.route(&Request::get(url("https://example.com/docs/brochure.pdf"))),
            Route::Passthrough(_)
        ));

        let standard = interceptor();
        assert!(matches!(
            standard.route(&Request::get(url("https://example.com/admin/panel"))),
            Route::Strategy(_)
        ));
    }
}
