//! Substring tokens that keep requests out of the cache entirely.

use tracing::trace;
use url::Url;

/// Ordered bypass tokens. A URL containing any of them is never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassList {
    tokens: Vec<String>,
}

impl BypassList {
    /// Build a list from literal tokens. Empty tokens would match everything and are dropped.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens = tokens
            .into_iter()
            .map(|t| t.as_ref().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens }
    }

    /// First token contained in the URL, if any.
    pub fn matching(&self, url: &Url) -> Option<&str> {
        let found = self
            .tokens
            .iter()
            .find(|token| url.as_str().contains(token.as_str()))?;
        trace!(url = %url, token = %found, "Bypass token matched");
        Some(found)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_from_tokens() {
        let list = BypassList::from_tokens(["gtag", "chrome-extension://", ""]);
        assert_eq!(list.len(), 2);

        assert_eq!(
            list.matching(&url("https://www.googletagmanager.com/gtag/js?id=G-1")),
            Some("gtag")
        );
        assert!(list.matching(&url("chrome-extension://abcdef/content.js")).is_some());
        assert!(list.matching(&url("https://example.com/style.css")).is_none());
    }

    #[test]
    fn test_first_match_reported() {
        let list = BypassList::from_tokens(["analytics", "google-analytics"]);
        let hit = list.matching(&url("https://www.google-analytics.com/collect"));
        assert_eq!(hit, Some("analytics"));
    }

    #[test]
    fn test_path_tokens_match_anywhere() {
        let list = BypassList::from_tokens(["/admin/", ".pdf"]);
        assert!(list.matching(&url("https://example.com/admin/users")).is_some());
        assert!(list.matching(&url("https://example.com/docs/brochure.pdf?dl=1")).is_some());
        assert!(list.matching(&url("https://example.com/administrator")).is_none());
    }

    #[test]
    fn test_empty_list_bypasses_nothing() {
        let list = BypassList::default();
        assert!(list.is_empty());
        assert!(list.matching(&url("https://example.com/analytics.js")).is_none());
    }
}
