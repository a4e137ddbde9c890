#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use prerender::{
    application::{
        render::{
            BrowserEngine, BrowsingContext, DocumentPostProcessor, EngineError, NavigationOptions,
            PoolConfig, RenderCoordinator, RenderWorkerPool, ResourceFilter,
        },
        sources::{FetchError, SitemapError, SitemapSource, StylesheetFetcher},
        warmer::SitemapWarmer,
    },
    cache::{CacheConfig, RenderCache},
};
use url::Url;

/// What a scripted page does when navigated to.
#[derive(Debug, Clone)]
pub enum PageScript {
    Serve { status: u16, html: String },
    Delay { after: Duration, status: u16, html: String },
    Fail(String),
    Hang,
    Panic,
}

impl PageScript {
    pub fn ok(html: impl Into<String>) -> Self {
        Self::Serve {
            status: 200,
            html: html.into(),
        }
    }

    pub fn status(status: u16, html: impl Into<String>) -> Self {
        Self::Serve {
            status,
            html: html.into(),
        }
    }
}

/// In-memory browser whose pages are scripted per URL. Unscripted URLs
/// answer 200 with a body naming the URL.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<EngineState>,
}

#[derive(Default)]
struct EngineState {
    scripts: Mutex<HashMap<String, PageScript>>,
    navigations: Mutex<Vec<String>>,
    contexts_opened: AtomicUsize,
    contexts_closed: AtomicUsize,
    filters_installed: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, script: PageScript) {
        self.state
            .scripts
            .lock()
            .expect("scripts lock")
            .insert(url.to_string(), script);
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.navigations.lock().expect("navigations lock").clone()
    }

    pub fn navigation_count(&self) -> usize {
        self.state.navigations.lock().expect("navigations lock").len()
    }

    pub fn contexts_opened(&self) -> usize {
        self.state.contexts_opened.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.state.contexts_closed.load(Ordering::SeqCst)
    }

    pub fn filters_installed(&self) -> usize {
        self.state.filters_installed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn script_for(&self, url: &Url) -> PageScript {
        self.state
            .scripts
            .lock()
            .expect("scripts lock")
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| {
                PageScript::ok(format!(
                    "<html><head><title>{url}</title></head><body><p>{url}</p></body></html>"
                ))
            })
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        self.state.contexts_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            engine: self.clone(),
            html: None,
        }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedContext {
    engine: ScriptedEngine,
    html: Option<String>,
}

#[async_trait]
impl BrowsingContext for ScriptedContext {
    async fn intercept_requests(
        &mut self,
        _filter: Arc<ResourceFilter>,
    ) -> Result<(), EngineError> {
        self.engine
            .state
            .filters_installed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &Url,
        _options: &NavigationOptions,
    ) -> Result<u16, EngineError> {
        self.engine
            .state
            .navigations
            .lock()
            .expect("navigations lock")
            .push(url.to_string());

        match self.engine.script_for(url) {
            PageScript::Serve { status, html } => {
                self.html = Some(html);
                Ok(status)
            }
            PageScript::Delay {
                after,
                status,
                html,
            } => {
                tokio::time::sleep(after).await;
                self.html = Some(html);
                Ok(status)
            }
            PageScript::Fail(message) => Err(EngineError::navigation(url, message)),
            PageScript::Hang => std::future::pending().await,
            PageScript::Panic => panic!("scripted panic while loading {url}"),
        }
    }

    async fn content(&mut self) -> Result<String, EngineError> {
        Ok(self.html.clone().unwrap_or_default())
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.engine
            .state
            .contexts_closed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stylesheets served from memory; unknown URLs answer 404.
#[derive(Default)]
pub struct StaticStylesheets {
    sheets: HashMap<String, String>,
}

impl StaticStylesheets {
    pub fn with(mut self, url: &str, css: &str) -> Self {
        self.sheets.insert(url.to_string(), css.to_string());
        self
    }
}

#[async_trait]
impl StylesheetFetcher for StaticStylesheets {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        self.sheets
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Sitemaps served from memory; unknown URLs answer 404.
#[derive(Default)]
pub struct StaticSitemaps {
    sitemaps: HashMap<String, Vec<Url>>,
}

impl StaticSitemaps {
    pub fn with(mut self, sitemap: &str, locations: &[&str]) -> Self {
        let locations = locations
            .iter()
            .map(|raw| Url::parse(raw).expect("valid location"))
            .collect();
        self.sitemaps.insert(sitemap.to_string(), locations);
        self
    }
}

#[async_trait]
impl SitemapSource for StaticSitemaps {
    async fn locations(&self, sitemap: &Url) -> Result<Vec<Url>, SitemapError> {
        self.sitemaps
            .get(sitemap.as_str())
            .cloned()
            .ok_or_else(|| {
                SitemapError::Fetch(FetchError::Status {
                    url: sitemap.to_string(),
                    status: 404,
                })
            })
    }
}

pub fn url(raw: &str) -> Url {
    Url::parse(raw).expect("valid url")
}

pub fn pool_config(max_concurrency: usize, navigation_timeout: Duration) -> PoolConfig {
    PoolConfig {
        max_concurrency,
        queue_capacity: 64,
        navigation_timeout,
    }
}

/// A coordinator over `engine` with the default filter.
pub fn coordinator(
    engine: &ScriptedEngine,
    pool: PoolConfig,
    cache: CacheConfig,
    stylesheets: StaticStylesheets,
) -> RenderCoordinator {
    let engine: Arc<dyn BrowserEngine> = Arc::new(engine.clone());
    let pool = Arc::new(RenderWorkerPool::launch(engine, pool));
    let cache = Arc::new(RenderCache::new(&cache));
    let post_processor = Arc::new(DocumentPostProcessor::new(Arc::new(stylesheets)));
    RenderCoordinator::new(
        pool,
        cache,
        post_processor,
        Arc::new(ResourceFilter::default()),
    )
}

pub fn default_coordinator(engine: &ScriptedEngine) -> RenderCoordinator {
    coordinator(
        engine,
        PoolConfig::default(),
        CacheConfig::default(),
        StaticStylesheets::default(),
    )
}

pub fn warmer(coordinator: &RenderCoordinator, sitemaps: StaticSitemaps) -> Arc<SitemapWarmer> {
    Arc::new(SitemapWarmer::new(coordinator.clone(), Arc::new(sitemaps)))
}
