//! Cache-aware entry point tying the pool, filter and post-processor together.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheKey, RenderCache};

use super::engine::BrowsingContext;
use super::filter::ResourceFilter;
use super::pool::{RenderError, RenderJob, RenderWorkerPool};
use super::postprocess::DocumentPostProcessor;
use super::runtime::{InFlightRenders, RenderGuard};
use super::types::{NavigationOptions, RenderRequest, RenderResult};

/// The standard job: intercept, navigate, post-process, serialize.
pub struct PageRenderJob {
    url: Url,
    filter: Arc<ResourceFilter>,
    post_processor: Arc<DocumentPostProcessor>,
}

impl PageRenderJob {
    pub fn new(
        url: Url,
        filter: Arc<ResourceFilter>,
        post_processor: Arc<DocumentPostProcessor>,
    ) -> Self {
        Self {
            url,
            filter,
            post_processor,
        }
    }
}

#[async_trait]
impl RenderJob for PageRenderJob {
    async fn run(
        self: Box<Self>,
        context: &mut dyn BrowsingContext,
        options: &NavigationOptions,
    ) -> Result<RenderResult, RenderError> {
        context.intercept_requests(Arc::clone(&self.filter)).await?;

        let status = tokio::time::timeout(options.timeout, context.navigate(&self.url, options))
            .await
            .map_err(|_| RenderError::NavigationTimeout {
                timeout_ms: options.timeout.as_millis(),
            })??;

        let html = context.content().await?;
        let html = self.post_processor.process(&html, &self.url).await?;
        Ok(RenderResult::new(html, status))
    }
}

#[derive(Clone)]
pub struct RenderCoordinator {
    pool: Arc<RenderWorkerPool>,
    cache: Arc<RenderCache>,
    post_processor: Arc<DocumentPostProcessor>,
    filter: Arc<ResourceFilter>,
    inflight: Option<InFlightRenders>,
}

impl RenderCoordinator {
    pub fn new(
        pool: Arc<RenderWorkerPool>,
        cache: Arc<RenderCache>,
        post_processor: Arc<DocumentPostProcessor>,
        filter: Arc<ResourceFilter>,
    ) -> Self {
        Self {
            pool,
            cache,
            post_processor,
            filter,
            inflight: None,
        }
    }

    /// Concurrent renders of one key share a single result.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.inflight = enabled.then(InFlightRenders::new);
        self
    }

    pub fn cache(&self) -> &Arc<RenderCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<RenderWorkerPool> {
        &self.pool
    }

    /// Serve `request` from the cache when allowed, otherwise render it.
    ///
    /// Every failure is folded into a 500 result. The render runs on its own
    /// task, so abandoning this future still lets the result reach the cache.
    pub async fn resolve(&self, request: RenderRequest) -> RenderResult {
        let key = request.cache_key();

        if !request.bypasses_cache() {
            if let Some(hit) = self.cache.get(&key) {
                debug!(target = "prerender::coordinator", key = %key, "cache hit");
                return hit;
            }
        } else {
            debug!(
                target = "prerender::coordinator",
                key = %key,
                url = %request.effective_url(),
                "query present, bypassing cache"
            );
        }

        match &self.inflight {
            Some(inflight) => {
                let coordinator = self.clone();
                let render_key = key.clone();
                inflight
                    .run(key, move |guard| {
                        coordinator.spawn_render(render_key, Some(guard)).boxed()
                    })
                    .await
            }
            None => self.spawn_render(key, None).await,
        }
    }

    fn spawn_render(
        &self,
        key: CacheKey,
        guard: Option<RenderGuard>,
    ) -> impl Future<Output = RenderResult> + Send + 'static {
        let pool = Arc::clone(&self.pool);
        let cache = Arc::clone(&self.cache);
        let job = PageRenderJob::new(
            key.url().clone(),
            Arc::clone(&self.filter),
            Arc::clone(&self.post_processor),
        );

        let handle = tokio::spawn(async move {
            // Released only after the cache is updated, even if every caller left.
            let _guard = guard;
            let result = match pool.execute(key.clone(), Box::new(job)).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(target = "prerender::coordinator", key = %key, error = %err, "render rejected");
                    RenderResult::failure(err.to_string())
                }
            };
            if result.is_cacheable() {
                cache.set(key, result.clone());
            }
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|err| RenderResult::failure(format!("render task failed: {err}")))
        }
    }
}
