use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        render::{METRIC_POOL_BUSY, METRIC_RENDER, METRIC_RENDER_FAILED, METRIC_RENDER_MS},
        warmer::METRIC_WARM_FAILED,
    },
    cache::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS},
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of render cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of render cache misses, including expired entries."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Total number of render cache evictions due to capacity."
        );
        describe_counter!(
            METRIC_RENDER,
            Unit::Count,
            "Total number of render jobs started by the pool."
        );
        describe_counter!(
            METRIC_RENDER_FAILED,
            Unit::Count,
            "Total number of render jobs that ended in a 500 result."
        );
        describe_counter!(
            METRIC_WARM_FAILED,
            Unit::Count,
            "Total number of sitemap URLs whose refresh did not return 200."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Render job latency in milliseconds."
        );
        describe_gauge!(
            METRIC_POOL_BUSY,
            Unit::Count,
            "Number of render workers currently running a job."
        );
    });
}
