//! Cache key normalization.

use std::fmt;

use url::Url;

/// Canonical form of a page URL used to index rendered snapshots.
///
/// Query string and fragment are dropped so that `https://example.com/page`,
/// `https://example.com/page?utm=1` and `https://example.com/page#top` all
/// share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Url);

impl CacheKey {
    pub fn from_url(url: &Url) -> Self {
        let mut canonical = url.clone();
        canonical.set_query(None);
        canonical.set_fragment(None);
        Self(canonical)
    }

    /// The query-free URL a render job navigates to.
    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&Url> for CacheKey {
    fn from(url: &Url) -> Self {
        Self::from_url(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> CacheKey {
        CacheKey::from_url(&Url::parse(raw).expect("valid url"))
    }

    #[test]
    fn strips_query_and_fragment() {
        assert_eq!(
            key("https://example.com/page?utm=1#top").as_str(),
            "https://example.com/page"
        );
    }

    #[test]
    fn same_path_maps_to_same_key() {
        assert_eq!(
            key("https://example.com/page?a=1"),
            key("https://example.com/page?b=2#x")
        );
        assert_eq!(key("https://example.com/page?"), key("https://example.com/page"));
    }

    #[test]
    fn distinct_paths_stay_distinct() {
        assert_ne!(key("https://example.com/a"), key("https://example.com/b"));
        assert_ne!(key("http://example.com/a"), key("https://example.com/a"));
    }
}
