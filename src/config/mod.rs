//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "prerender";
const ENV_PREFIX: &str = "PRERENDER";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1000;
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 25_000;
const DEFAULT_MAX_CONCURRENCY: u64 = 4;
const DEFAULT_QUEUE_CAPACITY: u64 = 1024;
const DEFAULT_STYLESHEET_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SITEMAP_DELAY_MS: u64 = 3000;
const DEFAULT_SITEMAP_LIMIT: u64 = 5;
const DEFAULT_BROWSER_ARGS: &[&str] = &["--no-sandbox", "--disable-gpu", "--disable-dev-shm-usage"];

/// Command-line arguments for the prerender binary.
#[derive(Debug, Parser)]
#[command(
    name = "prerender",
    version,
    about = "Server-side rendering proxy backed by headless Chromium"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRERENDER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Render a single URL and print the resulting HTML.
    Render(RenderArgs),
    /// Fetch a sitemap and render every URL it lists.
    Warm(WarmArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Absolute URL of the page to render.
    #[arg(value_name = "URL", value_hint = ValueHint::Url)]
    pub url: String,
}

#[derive(Debug, Args, Clone)]
pub struct WarmArgs {
    /// Absolute URL of the sitemap.
    #[arg(value_name = "SITEMAP_URL", value_hint = ValueHint::Url)]
    pub sitemap: String,

    /// Cache-bust version appended as `v=<VERSION>`; defaults to the current time in ms.
    #[arg(long, value_name = "VERSION")]
    pub version: Option<String>,
}

/// Flags overriding file and environment settings. Several also read the
/// short environment names older deployments use.
#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST", global = true)]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", env = "PORT", value_name = "PORT", global = true)]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(
        long = "server-graceful-shutdown-seconds",
        value_name = "SECONDS",
        global = true
    )]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the maximum number of cached snapshots.
    #[arg(
        long = "cache-max-entries",
        env = "CACHE_MAXSIZE",
        value_name = "COUNT",
        global = true
    )]
    pub cache_max_entries: Option<u64>,

    /// Override the snapshot time-to-live.
    #[arg(
        long = "cache-ttl-seconds",
        env = "CACHE_TTL",
        value_name = "SECONDS",
        global = true
    )]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the page navigation timeout.
    #[arg(
        long = "navigation-timeout-ms",
        env = "REQUEST_TIMEOUT",
        value_name = "MILLISECONDS",
        global = true
    )]
    pub navigation_timeout_ms: Option<u64>,

    /// Override the number of concurrent browsing contexts.
    #[arg(
        long = "max-concurrency",
        env = "MAX_CONCURRENCY",
        value_name = "COUNT",
        global = true
    )]
    pub max_concurrency: Option<u64>,

    /// Override the number of render jobs that may wait for a worker.
    #[arg(long = "render-queue-capacity", value_name = "COUNT", global = true)]
    pub render_queue_capacity: Option<u64>,

    /// Share one render between concurrent requests for the same page.
    #[arg(
        long = "coalesce-inflight",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub coalesce_inflight: Option<bool>,

    /// Override the timeout for stylesheet downloads.
    #[arg(long = "stylesheet-timeout-ms", value_name = "MILLISECONDS", global = true)]
    pub stylesheet_timeout_ms: Option<u64>,

    /// Override the Chromium executable.
    #[arg(
        long = "chrome-bin",
        env = "CHROME_BIN",
        value_name = "PATH",
        value_hint = ValueHint::ExecutablePath,
        global = true
    )]
    pub chrome_bin: Option<PathBuf>,

    /// Override the pause between batches of nested sitemaps.
    #[arg(long = "sitemap-delay-ms", value_name = "MILLISECONDS", global = true)]
    pub sitemap_delay_ms: Option<u64>,

    /// Override how many nested sitemaps are fetched per batch.
    #[arg(long = "sitemap-limit", value_name = "COUNT", global = true)]
    pub sitemap_limit: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
    pub browser: BrowserSettings,
    pub sitemap: SitemapSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: NonZeroUsize,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub navigation_timeout: Duration,
    pub max_concurrency: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
    pub coalesce_inflight: bool,
    pub stylesheet_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SitemapSettings {
    pub delay: Duration,
    pub limit: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    render: RawRenderSettings,
    browser: RawBrowserSettings,
    sitemap: RawSitemapSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(timeout) = overrides.navigation_timeout_ms {
            self.render.navigation_timeout_ms = Some(timeout);
        }
        if let Some(max) = overrides.max_concurrency {
            self.render.max_concurrency = Some(max);
        }
        if let Some(capacity) = overrides.render_queue_capacity {
            self.render.queue_capacity = Some(capacity);
        }
        if let Some(coalesce) = overrides.coalesce_inflight {
            self.render.coalesce_inflight = Some(coalesce);
        }
        if let Some(timeout) = overrides.stylesheet_timeout_ms {
            self.render.stylesheet_timeout_ms = Some(timeout);
        }
        if let Some(path) = overrides.chrome_bin.as_ref() {
            self.browser.executable = Some(path.clone());
        }
        if let Some(delay) = overrides.sitemap_delay_ms {
            self.sitemap.delay_ms = Some(delay);
        }
        if let Some(limit) = overrides.sitemap_limit {
            self.sitemap.limit = Some(limit);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            render,
            browser,
            sitemap,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            render: build_render_settings(render)?,
            browser: build_browser_settings(browser),
            sitemap: build_sitemap_settings(sitemap)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = positive(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        "cache.max_entries",
    )?;
    let ttl_secs = positive(cache.ttl_seconds, DEFAULT_CACHE_TTL_SECS, "cache.ttl_seconds")?;

    Ok(CacheSettings {
        max_entries,
        ttl: Duration::from_secs(ttl_secs),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let navigation_timeout_ms = positive(
        render.navigation_timeout_ms,
        DEFAULT_NAVIGATION_TIMEOUT_MS,
        "render.navigation_timeout_ms",
    )?;
    let max_concurrency = non_zero_usize(
        render.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        "render.max_concurrency",
    )?;
    let queue_capacity = non_zero_usize(
        render.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        "render.queue_capacity",
    )?;
    let stylesheet_timeout_ms = positive(
        render.stylesheet_timeout_ms,
        DEFAULT_STYLESHEET_TIMEOUT_MS,
        "render.stylesheet_timeout_ms",
    )?;

    Ok(RenderSettings {
        navigation_timeout: Duration::from_millis(navigation_timeout_ms),
        max_concurrency,
        queue_capacity,
        coalesce_inflight: render.coalesce_inflight.unwrap_or(false),
        stylesheet_timeout: Duration::from_millis(stylesheet_timeout_ms),
    })
}

fn build_browser_settings(browser: RawBrowserSettings) -> BrowserSettings {
    let executable = browser
        .executable
        .filter(|path| !path.as_os_str().is_empty());
    let args = browser.args.unwrap_or_else(|| {
        DEFAULT_BROWSER_ARGS
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    });

    BrowserSettings { executable, args }
}

fn build_sitemap_settings(sitemap: RawSitemapSettings) -> Result<SitemapSettings, LoadError> {
    let delay_ms = positive(sitemap.delay_ms, DEFAULT_SITEMAP_DELAY_MS, "sitemap.delay_ms")?;
    let limit = non_zero_usize(
        sitemap.limit.unwrap_or(DEFAULT_SITEMAP_LIMIT),
        "sitemap.limit",
    )?;

    Ok(SitemapSettings {
        delay: Duration::from_millis(delay_ms),
        limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_entries: Option<u64>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    navigation_timeout_ms: Option<u64>,
    max_concurrency: Option<u64>,
    queue_capacity: Option<u64>,
    coalesce_inflight: Option<bool>,
    stylesheet_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserSettings {
    executable: Option<PathBuf>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSitemapSettings {
    delay_ms: Option<u64>,
    limit: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        value => Ok(value),
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
