//! Headless Chromium engine driven over CDP with `chromiumoxide`.
//!
//! One browser process is shared by every worker. Each browsing context is a
//! CDP browser context (separate cookies and storage) holding a single page.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chromiumoxide::{
    Browser, BrowserConfig, Page,
    cdp::browser_protocol::{
        fetch::{
            self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
        },
        network::{
            self, ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
            EventResponseReceived, ResourceType,
        },
        browser::BrowserContextId,
        target::{CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams},
    },
};
use futures::StreamExt;
use tokio::{sync::RwLock, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::application::render::{
    BrowserEngine, BrowsingContext, EngineError, NavigationOptions, ResourceFilter,
};
use crate::config::BrowserSettings;

use super::error::InfraError;

const IDLE_POLL: std::time::Duration = std::time::Duration::from_millis(50);

type SharedBrowser = Arc<RwLock<Option<Browser>>>;

pub struct ChromiumEngine {
    browser: SharedBrowser,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumEngine {
    /// Launch the browser process and start pumping its CDP connection.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, InfraError> {
        let mut builder = BrowserConfig::builder().args(settings.args.iter().cloned());
        if let Some(executable) = settings.executable.as_ref() {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(InfraError::browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| InfraError::browser(err.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target = "prerender::browser", error = %err, "cdp handler error");
                }
            }
        });

        info!(
            target = "prerender::browser",
            executable = settings
                .executable
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "auto".to_string()),
            "browser launched"
        );

        Ok(Self {
            browser: Arc::new(RwLock::new(Some(browser))),
            handler: Mutex::new(Some(handler)),
        })
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, EngineError> {
        let guard = self.browser.read().await;
        let browser = guard.as_ref().ok_or(EngineError::Closed)?;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|err| EngineError::Context(err.to_string()))?
            .result
            .browser_context_id;

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(EngineError::Context)?;

        let page = match browser.new_page(params).await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(EngineError::Context(err.to_string()));
            }
        };

        Ok(Box::new(ChromiumContext {
            browser: Arc::clone(&self.browser),
            context_id,
            page,
            tasks: Vec::new(),
        }))
    }

    async fn close(&self) -> Result<(), EngineError> {
        let browser = self.browser.write().await.take();
        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(EngineError::protocol)
            }
            None => Ok(()),
        };

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            handler.abort();
        }
        result
    }
}

/// In-flight request bookkeeping used to detect network idle.
struct NetworkActivity {
    inflight: HashSet<String>,
    idle_since: Option<Instant>,
    max_inflight: usize,
}

impl NetworkActivity {
    fn new(max_inflight: usize) -> Self {
        Self {
            inflight: HashSet::new(),
            idle_since: Some(Instant::now()),
            max_inflight,
        }
    }

    fn started(&mut self, id: String) {
        self.inflight.insert(id);
        self.refresh();
    }

    fn finished(&mut self, id: &str) {
        self.inflight.remove(id);
        self.refresh();
    }

    fn refresh(&mut self) {
        if self.inflight.len() > self.max_inflight {
            self.idle_since = None;
        } else if self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
    }
}

struct ChromiumContext {
    browser: SharedBrowser,
    context_id: BrowserContextId,
    page: Page,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumContext {
    async fn track_network(
        &mut self,
        options: &NavigationOptions,
    ) -> Result<Arc<Mutex<NetworkActivity>>, EngineError> {
        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(EngineError::protocol)?;

        let activity = Arc::new(Mutex::new(NetworkActivity::new(options.idle_max_inflight)));

        let mut sent = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(EngineError::protocol)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(EngineError::protocol)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(EngineError::protocol)?;

        let tracked = Arc::clone(&activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                lock_activity(&tracked).started(event.request_id.inner().clone());
            }
        }));
        let tracked = Arc::clone(&activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                lock_activity(&tracked).finished(event.request_id.inner());
            }
        }));
        let tracked = Arc::clone(&activity);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = failed.next().await {
                lock_activity(&tracked).finished(event.request_id.inner());
            }
        }));

        Ok(activity)
    }

    async fn track_main_status(&mut self) -> Result<Arc<Mutex<Option<u16>>>, EngineError> {
        let main_frame = self.page.mainframe().await.map_err(EngineError::protocol)?;
        let status = Arc::new(Mutex::new(None));

        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(EngineError::protocol)?;

        let recorded = Arc::clone(&status);
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let is_main_document = event.r#type == ResourceType::Document
                    && (main_frame.is_none() || event.frame_id == main_frame);
                if is_main_document {
                    let code = u16::try_from(event.response.status).unwrap_or(500);
                    *recorded.lock().unwrap_or_else(|p| p.into_inner()) = Some(code);
                }
            }
        }));

        Ok(status)
    }
}

fn lock_activity(activity: &Mutex<NetworkActivity>) -> std::sync::MutexGuard<'_, NetworkActivity> {
    activity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BrowsingContext for ChromiumContext {
    async fn intercept_requests(
        &mut self,
        filter: Arc<ResourceFilter>,
    ) -> Result<(), EngineError> {
        let mut paused = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(EngineError::protocol)?;
        self.page
            .execute(fetch::EnableParams::default())
            .await
            .map_err(EngineError::protocol)?;

        let page = self.page.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let resource_type = event.resource_type.as_ref();
                let outcome = if filter.decide(resource_type, &event.request.url).is_blocked() {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                } else {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(err) = outcome {
                    debug!(
                        target = "prerender::browser",
                        url = %event.request.url,
                        error = %err,
                        "failed to resolve intercepted request"
                    );
                }
            }
        }));

        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &Url,
        options: &NavigationOptions,
    ) -> Result<u16, EngineError> {
        let activity = self.track_network(options).await?;
        let status = self.track_main_status().await?;

        self.page
            .goto(url.as_str())
            .await
            .map_err(|err| EngineError::navigation(url, err.to_string()))?;

        loop {
            let idle = lock_activity(&activity)
                .idle_since
                .is_some_and(|since| since.elapsed() >= options.idle_quiet);
            if idle {
                break;
            }
            sleep(IDLE_POLL).await;
        }

        let status = *status.lock().unwrap_or_else(|p| p.into_inner());
        status.ok_or_else(|| EngineError::navigation(url, "no response for the main document"))
    }

    async fn content(&mut self) -> Result<String, EngineError> {
        self.page.content().await.map_err(EngineError::protocol)
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        let ChromiumContext {
            browser,
            context_id,
            page,
            tasks,
        } = *self;

        for task in tasks {
            task.abort();
        }

        if let Err(err) = page.close().await {
            warn!(target = "prerender::browser", error = %err, "failed to close page");
        }

        let guard = browser.read().await;
        match guard.as_ref() {
            Some(browser) => browser
                .execute(DisposeBrowserContextParams::new(context_id))
                .await
                .map(|_| ())
                .map_err(EngineError::protocol),
            None => Ok(()),
        }
    }
}
