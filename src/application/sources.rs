//! Traits describing out-of-band network fetches.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to `{url}` failed: {message}")]
    Transport { url: String, message: String },
    #[error("`{url}` answered with status {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn transport(url: &Url, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Downloads stylesheet bodies so they can be inlined into a snapshot.
#[async_trait]
pub trait StylesheetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to parse sitemap `{url}`: {message}")]
    Parse { url: String, message: String },
}

impl SitemapError {
    pub fn parse(url: &Url, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

/// Resolves a sitemap into the page locations it lists.
#[async_trait]
pub trait SitemapSource: Send + Sync {
    async fn locations(&self, sitemap: &Url) -> Result<Vec<Url>, SitemapError>;
}
