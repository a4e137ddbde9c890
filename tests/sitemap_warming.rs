mod support;

use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use prerender::{
    application::{
        render::{RenderRequest, RenderResult},
        sources::SitemapError,
        warmer::WarmReport,
    },
    cache::{CacheConfig, CacheKey},
};

use support::{
    PageScript, ScriptedEngine, StaticSitemaps, StaticStylesheets, coordinator,
    default_coordinator, pool_config, url, warmer,
};

fn counter_value(snapshotter: &Snapshotter, name: &str) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| match value {
            DebugValue::Counter(count) if key.key().name() == name => Some(count),
            _ => None,
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn warming_refreshes_every_listed_page() {
    let engine = ScriptedEngine::new();
    let coordinator = default_coordinator(&engine);
    let warmer = warmer(&coordinator, StaticSitemaps::default());

    let stale = RenderResult::new("<html>stale</html>", 200);
    for raw in ["https://example.com/a", "https://example.com/b"] {
        coordinator
            .cache()
            .set(CacheKey::from_url(&url(raw)), stale.clone());
    }

    let report = warmer
        .warm(
            vec![url("https://example.com/a"), url("https://example.com/b")],
            "v=123",
        )
        .join()
        .await
        .expect("warming task");

    assert_eq!(
        report,
        WarmReport {
            refreshed: 2,
            failed: 0
        }
    );
    assert_eq!(engine.navigation_count(), 2);

    for raw in ["https://example.com/a", "https://example.com/b"] {
        let cached = coordinator
            .cache()
            .get(&CacheKey::from_url(&url(raw)))
            .expect("entry refreshed");
        assert_ne!(cached, stale);
        assert!(cached.html.contains(raw));
    }

    let served = coordinator
        .resolve(RenderRequest::new(url("https://example.com/a")))
        .await;
    assert!(served.html.contains("https://example.com/a"));
    assert_eq!(engine.navigation_count(), 2);
}

#[tokio::test]
async fn failed_pages_are_counted_and_do_not_stop_the_rest() {
    let engine = ScriptedEngine::new();
    engine.script(
        "https://example.com/broken",
        PageScript::Fail("net::ERR_CONNECTION_REFUSED".to_string()),
    );
    engine.script(
        "https://example.com/gone",
        PageScript::status(404, "<html><head></head><body>gone</body></html>"),
    );
    let coordinator = default_coordinator(&engine);
    let warmer = warmer(&coordinator, StaticSitemaps::default());

    let report = warmer
        .warm(
            vec![
                url("https://example.com/broken"),
                url("https://example.com/ok"),
                url("https://example.com/gone"),
            ],
            "v=1",
        )
        .join()
        .await
        .expect("warming task");

    assert_eq!(
        report,
        WarmReport {
            refreshed: 1,
            failed: 2
        }
    );
    assert_eq!(coordinator.cache().len(), 1);
}

#[tokio::test]
async fn queued_sitemap_reports_its_size_before_completion() {
    let engine = ScriptedEngine::new();
    let coordinator = default_coordinator(&engine);
    let warmer = warmer(
        &coordinator,
        StaticSitemaps::default().with(
            "https://example.com/sitemap.xml",
            &[
                "https://example.com/",
                "https://example.com/about",
                "https://example.com/blog",
            ],
        ),
    );

    let queued = warmer
        .queue_sitemap(&url("https://example.com/sitemap.xml"), "v=42")
        .await
        .expect("sitemap loads");
    assert_eq!(queued.count, 3);

    let report = queued.handle.join().await.expect("warming task");
    assert_eq!(report.refreshed, 3);
    assert_eq!(coordinator.cache().len(), 3);
}

#[tokio::test]
async fn unreachable_sitemap_is_an_error() {
    let engine = ScriptedEngine::new();
    let coordinator = default_coordinator(&engine);
    let warmer = warmer(&coordinator, StaticSitemaps::default());

    let err = warmer
        .queue_sitemap(&url("https://example.com/nope.xml"), "v=1")
        .await
        .err()
        .expect("missing sitemap");

    assert!(matches!(err, SitemapError::Fetch(_)));
    assert_eq!(engine.navigation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn outcomes_are_tallied_as_each_page_settles() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let _local = metrics::set_default_local_recorder(&recorder);

    let engine = ScriptedEngine::new();
    engine.script(
        "https://example.com/slow",
        PageScript::Delay {
            after: Duration::from_secs(10),
            status: 200,
            html: "<html><head></head><body>slow</body></html>".to_string(),
        },
    );
    engine.script(
        "https://example.com/broken",
        PageScript::Fail("net::ERR_FAILED".to_string()),
    );
    let coordinator = coordinator(
        &engine,
        pool_config(2, Duration::from_secs(30)),
        CacheConfig::default(),
        StaticStylesheets::default(),
    );
    let handle = warmer(&coordinator, StaticSitemaps::default()).warm(
        vec![url("https://example.com/slow"), url("https://example.com/broken")],
        "v=1",
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());
    assert_eq!(counter_value(&snapshotter, "prerender_warm_failed_total"), 1);

    let report = handle.join().await.expect("warming task");
    assert_eq!(
        report,
        WarmReport {
            refreshed: 1,
            failed: 1
        }
    );
}
