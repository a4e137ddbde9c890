use std::time::Duration;

use httpmock::MockServer;
use prerender::{
    application::sources::{FetchError, SitemapError, SitemapSource, StylesheetFetcher},
    infra::{sitemap::HttpSitemapSource, stylesheets::HttpStylesheetFetcher},
};
use url::Url;

fn url(raw: &str) -> Url {
    Url::parse(raw).expect("valid url")
}

fn urlset(locations: &[String]) -> String {
    let entries: String = locations
        .iter()
        .map(|loc| format!("<url><loc>{loc}</loc></url>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
    )
}

fn index(locations: &[String]) -> String {
    let entries: String = locations
        .iter()
        .map(|loc| format!("<sitemap><loc>{loc}</loc></sitemap>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#
    )
}

#[tokio::test]
async fn stylesheet_fetcher_returns_the_body() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/main.css");
            then.status(200)
                .header("content-type", "text/css")
                .body("body{margin:0}");
        })
        .await;

    let fetcher = HttpStylesheetFetcher::new(Duration::from_secs(5)).expect("client builds");
    let css = fetcher
        .fetch(&url(&server.url("/main.css")))
        .await
        .expect("stylesheet fetched");

    assert_eq!(css, "body{margin:0}");
    mock.assert_async().await;
}

#[tokio::test]
async fn stylesheet_fetcher_rejects_error_statuses() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/missing.css");
            then.status(404);
        })
        .await;

    let fetcher = HttpStylesheetFetcher::new(Duration::from_secs(5)).expect("client builds");
    let err = fetcher
        .fetch(&url(&server.url("/missing.css")))
        .await
        .expect_err("404 is a failure");

    assert!(matches!(err, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn sitemap_source_reads_a_urlset() {
    let server = MockServer::start_async().await;
    let pages = vec![server.url("/"), server.url("/about?lang=en&amp;x=1")];
    server
        .mock_async(|when, then| {
            when.method("GET").path("/sitemap.xml");
            then.status(200)
                .header("content-type", "application/xml")
                .body(urlset(&pages));
        })
        .await;

    let source = HttpSitemapSource::new(Duration::ZERO, 5).expect("client builds");
    let locations = source
        .locations(&url(&server.url("/sitemap.xml")))
        .await
        .expect("sitemap parsed");

    assert_eq!(
        locations,
        vec![url(&server.url("/")), url(&server.url("/about?lang=en&x=1"))]
    );
}

#[tokio::test]
async fn sitemap_source_follows_nested_indexes_and_skips_broken_children() {
    let server = MockServer::start_async().await;

    let root = index(&[
        server.url("/posts.xml"),
        server.url("/broken.xml"),
        server.url("/more.xml"),
    ]);
    let nested = index(&[server.url("/pages.xml"), server.url("/posts.xml")]);
    let posts = urlset(&[server.url("/posts/1"), server.url("/posts/2")]);
    let pages = urlset(&[server.url("/about")]);

    server
        .mock_async(|when, then| {
            when.method("GET").path("/sitemap.xml");
            then.status(200).body(root);
        })
        .await;
    let posts_mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/posts.xml");
            then.status(200).body(posts);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/broken.xml");
            then.status(500);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/more.xml");
            then.status(200).body(nested);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/pages.xml");
            then.status(200).body(pages);
        })
        .await;

    let source = HttpSitemapSource::new(Duration::ZERO, 2).expect("client builds");
    let mut locations = source
        .locations(&url(&server.url("/sitemap.xml")))
        .await
        .expect("index resolved");
    locations.sort();

    let mut expected = vec![
        url(&server.url("/posts/1")),
        url(&server.url("/posts/2")),
        url(&server.url("/about")),
    ];
    expected.sort();

    assert_eq!(locations, expected);
    assert_eq!(posts_mock.hits_async().await, 1);
}

#[tokio::test]
async fn unreachable_root_sitemap_is_an_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method("GET").path("/sitemap.xml");
            then.status(503);
        })
        .await;

    let source = HttpSitemapSource::new(Duration::ZERO, 5).expect("client builds");
    let err = source
        .locations(&url(&server.url("/sitemap.xml")))
        .await
        .expect_err("503 is a failure");

    assert!(matches!(
        err,
        SitemapError::Fetch(FetchError::Status { status: 503, .. })
    ));
}
