//! Browsing engine traits the render pool drives.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::filter::ResourceFilter;
use super::types::NavigationOptions;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("failed to open browsing context: {0}")]
    Context(String),
    #[error("navigation to `{url}` failed: {message}")]
    Navigation { url: String, message: String },
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("browser has been closed")]
    Closed,
}

impl EngineError {
    pub fn navigation(url: &Url, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// A headless browser shared by every render worker.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a context isolated from every other open context (cookies, storage, cache).
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, EngineError>;

    /// Terminate the browser. Contexts still open afterwards are unusable.
    async fn close(&self) -> Result<(), EngineError>;
}

/// One isolated page owned by a single render job.
#[async_trait]
pub trait BrowsingContext: Send {
    /// Route every sub-resource request of this context through `filter`.
    async fn intercept_requests(&mut self, filter: Arc<ResourceFilter>)
    -> Result<(), EngineError>;

    /// Load `url` and wait until the network is idle. Returns the main document status.
    async fn navigate(&mut self, url: &Url, options: &NavigationOptions)
    -> Result<u16, EngineError>;

    /// Serialize the current document.
    async fn content(&mut self) -> Result<String, EngineError>;

    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
