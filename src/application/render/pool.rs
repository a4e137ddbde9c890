//! Bounded-concurrency executor for render jobs.
//!
//! A fixed set of workers pull jobs from one bounded FIFO channel. Each job
//! runs against a fresh browsing context of the shared engine, and every
//! outcome, including errors and panics, is converted into a [`RenderResult`].

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::cache::CacheKey;

use super::engine::{BrowserEngine, BrowsingContext, EngineError};
use super::postprocess::PostProcessError;
use super::types::{NavigationOptions, RenderResult};

pub(crate) const METRIC_RENDER: &str = "prerender_render_total";
pub(crate) const METRIC_RENDER_FAILED: &str = "prerender_render_failed_total";
pub(crate) const METRIC_RENDER_MS: &str = "prerender_render_ms";
pub(crate) const METRIC_POOL_BUSY: &str = "prerender_pool_busy";

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 25_000;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("render pool is closed")]
    Closed,
}

/// Why a single render job failed. Always surfaced as a 500 result.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Navigation timeout of {timeout_ms} ms exceeded")]
    NavigationTimeout { timeout_ms: u128 },
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),
    #[error("render job panicked: {0}")]
    Panicked(String),
}

/// Work executed inside one browsing context.
#[async_trait]
pub trait RenderJob: Send + 'static {
    async fn run(
        self: Box<Self>,
        context: &mut dyn BrowsingContext,
        options: &NavigationOptions,
    ) -> Result<RenderResult, RenderError>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub queue_capacity: usize,
    pub navigation_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            navigation_timeout: Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS),
        }
    }
}

impl From<&crate::config::RenderSettings> for PoolConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.get(),
            queue_capacity: settings.queue_capacity.get(),
            navigation_timeout: settings.navigation_timeout,
        }
    }
}

struct QueuedJob {
    key: CacheKey,
    job: Box<dyn RenderJob>,
    reply: oneshot::Sender<Result<RenderResult, PoolError>>,
}

type JobReceiver = Arc<AsyncMutex<mpsc::Receiver<QueuedJob>>>;

pub struct RenderWorkerPool {
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    closed: Arc<AtomicBool>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    engine: Arc<dyn BrowserEngine>,
}

impl RenderWorkerPool {
    /// Start `max_concurrency` workers sharing `engine`.
    pub fn launch(engine: Arc<dyn BrowserEngine>, config: PoolConfig) -> Self {
        let concurrency = config.max_concurrency.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver: JobReceiver = Arc::new(AsyncMutex::new(receiver));
        let closed = Arc::new(AtomicBool::new(false));
        let options = NavigationOptions::with_timeout(config.navigation_timeout);

        let workers = (0..concurrency)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&engine),
                    Arc::clone(&receiver),
                    Arc::clone(&closed),
                    options.clone(),
                ))
            })
            .collect();

        info!(
            target = "prerender::pool",
            workers = concurrency,
            queue_capacity = config.queue_capacity,
            navigation_timeout_ms = config.navigation_timeout.as_millis() as u64,
            "render pool started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            closed,
            workers: AsyncMutex::new(workers),
            engine,
        }
    }

    /// Queue `job` and wait for its result. Waits for queue space when the
    /// pool is saturated.
    pub async fn execute(
        &self,
        key: CacheKey,
        job: Box<dyn RenderJob>,
    ) -> Result<RenderResult, PoolError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PoolError::Closed)?;

        let (reply, response) = oneshot::channel();
        sender
            .send(QueuedJob { key, job, reply })
            .await
            .map_err(|_| PoolError::Closed)?;
        drop(sender);

        response.await.map_err(|_| PoolError::Closed)?
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work, let running jobs finish, reject queued jobs and
    /// close the engine. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(target = "prerender::pool", error = %err, "render worker ended abnormally");
            }
        }

        if let Err(err) = self.engine.close().await {
            warn!(target = "prerender::pool", error = %err, "failed to close browser");
        }
        info!(target = "prerender::pool", "render pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    engine: Arc<dyn BrowserEngine>,
    receiver: JobReceiver,
    closed: Arc<AtomicBool>,
    options: NavigationOptions,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };

        if closed.load(Ordering::Acquire) {
            debug!(
                target = "prerender::pool",
                key = %queued.key,
                "rejecting queued job after shutdown"
            );
            let _ = queued.reply.send(Err(PoolError::Closed));
            continue;
        }

        let QueuedJob { key, job, reply } = queued;
        let result = run_job(worker_id, engine.as_ref(), &key, job, &options).await;
        if reply.send(Ok(result)).is_err() {
            debug!(target = "prerender::pool", key = %key, "render result dropped by caller");
        }
    }
}

async fn run_job(
    worker_id: usize,
    engine: &dyn BrowserEngine,
    key: &CacheKey,
    job: Box<dyn RenderJob>,
    options: &NavigationOptions,
) -> RenderResult {
    let started = Instant::now();
    counter!(METRIC_RENDER).increment(1);
    gauge!(METRIC_POOL_BUSY).increment(1.0);

    let outcome = match engine.open_context().await {
        Ok(mut context) => {
            let outcome = AssertUnwindSafe(job.run(context.as_mut(), options))
                .catch_unwind()
                .await;
            if let Err(err) = context.close().await {
                warn!(target = "prerender::pool", key = %key, error = %err, "failed to close browsing context");
            }
            match outcome {
                Ok(result) => result,
                Err(panic) => Err(RenderError::Panicked(panic_message(panic.as_ref()))),
            }
        }
        Err(err) => Err(RenderError::from(err)),
    };

    gauge!(METRIC_POOL_BUSY).decrement(1.0);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    histogram!(METRIC_RENDER_MS).record(elapsed_ms as f64);

    match outcome {
        Ok(result) => {
            info!(
                target = "prerender::pool",
                worker_id,
                key = %key,
                status = result.status,
                elapsed_ms,
                "page rendered"
            );
            result
        }
        Err(err) => {
            counter!(METRIC_RENDER_FAILED).increment(1);
            warn!(
                target = "prerender::pool",
                worker_id,
                key = %key,
                elapsed_ms,
                error = %err,
                "render failed"
            );
            RenderResult::failure(err.to_string())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
