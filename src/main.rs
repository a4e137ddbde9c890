use std::{
    io::{self, Write},
    process,
    sync::Arc,
};

use prerender::{
    application::{
        error::AppError,
        render::{
            BrowserEngine, DocumentPostProcessor, PoolConfig, RenderCoordinator, RenderRequest,
            RenderWorkerPool, ResourceFilter,
        },
        sources::{SitemapSource, StylesheetFetcher},
        warmer::{SitemapWarmer, WarmReport},
    },
    cache::{CacheConfig, RenderCache},
    config,
    infra::{
        browser::ChromiumEngine,
        error::InfraError,
        http::{self, HttpState},
        sitemap::HttpSitemapSource,
        stylesheets::HttpStylesheetFetcher,
        telemetry,
    },
};
use time::OffsetDateTime;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args.command.unwrap_or(config::Command::Serve);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Warm(args) => run_warm(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let http_state = HttpState {
        coordinator: app.coordinator.clone(),
        warmer: Arc::clone(&app.warmer),
    };
    let result = serve_http(&settings, http_state).await;

    app.shutdown(&settings).await;
    result
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let url = parse_absolute_url(&args.url)?;
    let app = build_application_context(&settings).await?;

    let result = app.coordinator.resolve(RenderRequest::new(url.clone())).await;
    app.shutdown(&settings).await;

    info!(
        target = "prerender::cli::render",
        url = %url,
        status = result.status,
        bytes = result.html.len(),
        "render finished"
    );

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(result.html.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    if !(200..300).contains(&result.status) {
        return Err(AppError::unexpected(format!(
            "render of `{url}` finished with status {}",
            result.status
        )));
    }
    Ok(())
}

async fn run_warm(settings: config::Settings, args: config::WarmArgs) -> Result<(), AppError> {
    let sitemap = parse_absolute_url(&args.sitemap)?;
    let version = args.version.unwrap_or_else(|| {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string()
    });
    let app = build_application_context(&settings).await?;

    let outcome = warm_sitemap(&app.warmer, &sitemap, &version).await;

    app.shutdown(&settings).await;
    let report = outcome?;

    info!(
        target = "prerender::cli::warm",
        refreshed = report.refreshed,
        failed = report.failed,
        "warming finished"
    );

    if report.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} of {} urls failed to refresh",
            report.failed,
            report.failed + report.refreshed
        )));
    }
    Ok(())
}

async fn warm_sitemap(
    warmer: &SitemapWarmer,
    sitemap: &Url,
    version: &str,
) -> Result<WarmReport, AppError> {
    let queued = warmer
        .queue_sitemap(sitemap, format!("v={version}"))
        .await?;
    info!(
        target = "prerender::cli::warm",
        sitemap = %sitemap,
        count = queued.count,
        "warming sitemap"
    );
    queued
        .handle
        .join()
        .await
        .map_err(|err| AppError::unexpected(format!("warming task failed: {err}")))
}

struct ApplicationContext {
    coordinator: RenderCoordinator,
    warmer: Arc<SitemapWarmer>,
    pool: Arc<RenderWorkerPool>,
    cache: Arc<RenderCache>,
}

impl ApplicationContext {
    /// Drain the pool within the graceful shutdown window, then drop every snapshot.
    async fn shutdown(&self, settings: &config::Settings) {
        let grace = settings.server.graceful_shutdown;
        if tokio::time::timeout(grace, self.pool.shutdown()).await.is_err() {
            warn!(
                target = "prerender::shutdown",
                timeout_secs = grace.as_secs(),
                "render pool did not drain before the shutdown timeout"
            );
        }
        self.cache.close();
    }
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let engine: Arc<dyn BrowserEngine> = Arc::new(ChromiumEngine::launch(&settings.browser).await?);
    let pool = Arc::new(RenderWorkerPool::launch(
        engine,
        PoolConfig::from(&settings.render),
    ));
    let cache = Arc::new(RenderCache::new(&CacheConfig::from(&settings.cache)));

    let fetcher: Arc<dyn StylesheetFetcher> = Arc::new(HttpStylesheetFetcher::new(
        settings.render.stylesheet_timeout,
    )?);
    let post_processor = Arc::new(DocumentPostProcessor::new(fetcher));

    let coordinator = RenderCoordinator::new(
        Arc::clone(&pool),
        Arc::clone(&cache),
        post_processor,
        Arc::new(ResourceFilter::default()),
    )
    .with_coalescing(settings.render.coalesce_inflight);

    let source: Arc<dyn SitemapSource> = Arc::new(HttpSitemapSource::new(
        settings.sitemap.delay,
        settings.sitemap.limit.get(),
    )?);
    let warmer = Arc::new(SitemapWarmer::new(coordinator.clone(), source));

    Ok(ApplicationContext {
        coordinator,
        warmer,
        pool,
        cache,
    })
}

fn parse_absolute_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| AppError::validation(format!("invalid url `{raw}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::validation(format!(
            "url `{raw}` must use http or https"
        )));
    }
    Ok(url)
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "prerender::server",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "prerender::server", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target = "prerender::server", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "prerender::server", "shutdown signal received");
}
