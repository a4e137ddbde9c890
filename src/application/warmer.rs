//! Sitemap-driven cache warming.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use metrics::counter;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};
use url::Url;

use crate::application::render::{RenderCoordinator, RenderRequest};
use crate::application::sources::{SitemapError, SitemapSource};

pub(crate) const METRIC_WARM_FAILED: &str = "prerender_warm_failed_total";

/// Tally of one warming run. Any status other than 200 counts as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Handle to a warming run that continues in the background.
pub struct WarmHandle {
    task: JoinHandle<WarmReport>,
}

impl WarmHandle {
    pub async fn join(self) -> Result<WarmReport, JoinError> {
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// A sitemap accepted for warming.
pub struct QueuedSitemap {
    pub count: usize,
    pub handle: WarmHandle,
}

pub struct SitemapWarmer {
    coordinator: RenderCoordinator,
    source: Arc<dyn SitemapSource>,
}

impl SitemapWarmer {
    pub fn new(coordinator: RenderCoordinator, source: Arc<dyn SitemapSource>) -> Self {
        Self {
            coordinator,
            source,
        }
    }

    /// Re-render every URL with `token` attached so each one refreshes its
    /// cache entry. All requests are submitted at once; the pool bound is the
    /// only throttle.
    pub fn warm(&self, urls: Vec<Url>, token: impl Into<String>) -> WarmHandle {
        let coordinator = self.coordinator.clone();
        let token = token.into();

        let task = tokio::spawn(async move {
            let total = urls.len();
            let mut renders: FuturesUnordered<_> = urls
                .into_iter()
                .map(|url| {
                    let request = RenderRequest::new(url).with_cache_bust(token.clone());
                    let coordinator = coordinator.clone();
                    async move {
                        let key = request.cache_key();
                        let result = coordinator.resolve(request).await;
                        (key, result)
                    }
                })
                .collect();

            // Tally each outcome as it settles so its document is dropped right away.
            let mut report = WarmReport::default();
            while let Some((key, result)) = renders.next().await {
                if result.is_cacheable() {
                    report.refreshed += 1;
                    info!(target = "prerender::warmer", key = %key, "cache refreshed");
                } else {
                    report.failed += 1;
                    counter!(METRIC_WARM_FAILED).increment(1);
                    warn!(
                        target = "prerender::warmer",
                        key = %key,
                        status = result.status,
                        "cache refresh failed"
                    );
                }
            }

            info!(
                target = "prerender::warmer",
                total,
                refreshed = report.refreshed,
                failed = report.failed,
                "warming finished"
            );
            report
        });

        WarmHandle { task }
    }

    /// Fetch `sitemap` and start warming every location it lists.
    pub async fn queue_sitemap(
        &self,
        sitemap: &Url,
        token: impl Into<String>,
    ) -> Result<QueuedSitemap, SitemapError> {
        let urls = self.source.locations(sitemap).await?;
        let count = urls.len();
        info!(
            target = "prerender::warmer",
            sitemap = %sitemap,
            count,
            "sitemap queued for warming"
        );
        Ok(QueuedSitemap {
            count,
            handle: self.warm(urls, token),
        })
    }
}
