use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::info;
use url::Url;

use crate::application::{
    error::{ErrorReport, HttpError},
    render::{RenderCoordinator, RenderRequest, RenderResult},
    warmer::SitemapWarmer,
};

use super::middleware::{allow_any_origin, log_responses, set_request_context};

const RENDER_USAGE: &str = "Invalid url param: Example: ?url=https://example.com";
const MAP_RENDER_USAGE: &str =
    "Invalid url param: Example: ?url=https://example.com/sitemap.xml&version=3.0.0";

#[derive(Clone)]
pub struct HttpState {
    pub coordinator: RenderCoordinator,
    pub warmer: Arc<SitemapWarmer>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/render", get(render))
        .route("/map-render", get(map_render))
        .route("/test", get(liveness))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .layer(middleware::from_fn(allow_any_origin))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RenderQuery {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MapRenderQuery {
    url: Option<String>,
    version: Option<String>,
}

async fn render(State(state): State<HttpState>, Query(query): Query<RenderQuery>) -> Response {
    let Some(url) = parse_target(query.url.as_deref()) else {
        return invalid_url("infra::http::public::render", RENDER_USAGE, query.url);
    };

    let result = state.coordinator.resolve(RenderRequest::new(url)).await;
    render_result_response(result)
}

async fn map_render(
    State(state): State<HttpState>,
    Query(query): Query<MapRenderQuery>,
) -> Result<Response, HttpError> {
    let Some(sitemap) = parse_target(query.url.as_deref()) else {
        return Ok(invalid_url(
            "infra::http::public::map_render",
            MAP_RENDER_USAGE,
            query.url,
        ));
    };

    let version = query
        .version
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(default_version);

    let queued = state
        .warmer
        .queue_sitemap(&sitemap, format!("v={version}"))
        .await?;

    info!(
        target = "prerender::http::map_render",
        sitemap = %sitemap,
        version = %version,
        count = queued.count,
        "sitemap warming started"
    );

    Ok((
        StatusCode::OK,
        format!(
            "The sitemap now in queue, number of urls to add is {}",
            queued.count
        ),
    )
        .into_response())
}

async fn liveness() -> &'static str {
    "test"
}

/// Only absolute http(s) URLs are accepted as render targets.
fn parse_target(raw: Option<&str>) -> Option<Url> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn invalid_url(source: &'static str, usage: &'static str, raw: Option<String>) -> Response {
    let detail = match raw {
        Some(raw) => format!("rejected url parameter `{raw}`"),
        None => "missing url parameter".to_string(),
    };
    HttpError::new(source, StatusCode::BAD_REQUEST, usage, detail).into_response()
}

/// Current Unix time in milliseconds, the default cache-bust version.
fn default_version() -> String {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string()
}

fn render_result_response(result: RenderResult) -> Response {
    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let report = status.is_server_error().then(|| {
        ErrorReport::from_message("infra::http::public::render", status, result.html.clone())
    });

    let mut response = (status, result.html).into_response();
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    if let Some(report) = report {
        report.attach(&mut response);
    }
    response
}
