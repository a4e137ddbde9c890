use std::time::Duration;

use url::Url;

use crate::cache::CacheKey;

/// Outcome of a single page render: serialized HTML plus the main document status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub html: String,
    pub status: u16,
}

impl RenderResult {
    pub fn new(html: impl Into<String>, status: u16) -> Self {
        Self {
            html: html.into(),
            status,
        }
    }

    /// A failed render. The body carries the error description.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, 500)
    }

    /// Only fully successful renders are worth keeping.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }
}

/// A page the caller wants rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: Url,
    pub cache_bust: Option<String>,
}

impl RenderRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cache_bust: None,
        }
    }

    /// Attach an opaque token such as `v=123`. It is appended verbatim to the
    /// query string, which forces a fresh render.
    pub fn with_cache_bust(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if !token.is_empty() {
            self.cache_bust = Some(token);
        }
        self
    }

    /// URL as seen by request identity: the original URL plus any cache-bust token.
    pub fn effective_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(token) = self.cache_bust.as_deref() {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
                _ => token.to_string(),
            };
            url.set_query(Some(&query));
        }
        url
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_url(&self.url)
    }

    /// Any query string at all, even an empty one, skips the cache lookup.
    pub fn bypasses_cache(&self) -> bool {
        self.effective_url().query().is_some()
    }
}

/// Number of in-flight requests tolerated while still calling the network idle.
pub const NETWORK_IDLE_MAX_INFLIGHT: usize = 2;
/// How long the in-flight count must stay at or below the limit.
pub const NETWORK_IDLE_QUIET: Duration = Duration::from_millis(500);

/// How a browsing context should load a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOptions {
    pub timeout: Duration,
    pub idle_max_inflight: usize,
    pub idle_quiet: Duration,
}

impl NavigationOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            idle_max_inflight: NETWORK_IDLE_MAX_INFLIGHT,
            idle_quiet: NETWORK_IDLE_QUIET,
        }
    }
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self::with_timeout(Duration::from_millis(25_000))
    }
}
