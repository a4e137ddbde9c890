//! Render pipeline.
//!
//! A [`RenderCoordinator`] resolves a [`RenderRequest`] either from the
//! [`RenderCache`](crate::cache::RenderCache) or by submitting a
//! [`PageRenderJob`] to the [`RenderWorkerPool`]. The job installs the
//! [`ResourceFilter`], navigates, and cleans the resulting document with the
//! [`DocumentPostProcessor`]. Failures never escape as errors; they become
//! 500 results carrying the error description.

mod coordinator;
mod engine;
mod filter;
mod pool;
mod postprocess;
mod runtime;
mod types;

pub use coordinator::{PageRenderJob, RenderCoordinator};
pub use engine::{BrowserEngine, BrowsingContext, EngineError};
pub use filter::{ResourceDecision, ResourceFilter};
pub use pool::{PoolConfig, PoolError, RenderError, RenderJob, RenderWorkerPool};
pub use postprocess::{DocumentPostProcessor, PostProcessError};
pub use runtime::{InFlightRenders, RenderGuard};
pub use types::{
    NETWORK_IDLE_MAX_INFLIGHT, NETWORK_IDLE_QUIET, NavigationOptions, RenderRequest, RenderResult,
};

pub(crate) use pool::{METRIC_POOL_BUSY, METRIC_RENDER, METRIC_RENDER_FAILED, METRIC_RENDER_MS};
