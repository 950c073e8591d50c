//! Integration tests for dependency-ordered start and stop

use async_runtime_compat::runtime_utils::sleep;
use service_registry::{Error, HealthState, HealthStatus, Registry, ServicePlugin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

#[smol_potat::test]
async fn test_dependency_started_first() {
    let log = call_log();
    let registry = Registry::default();
    let a = FakePlugin::new(unit("a"), &log);
    let b = FakePlugin::new(unit("b").with_dependencies(["a"]), &log);
    registry.register(a.clone()).await.unwrap();
    registry.register(b.clone()).await.unwrap();

    registry.start_service("b").await.unwrap();

    assert_eq!(calls(&log), vec!["start:a", "start:b"]);
    assert_eq!(a.core().status(), HealthStatus::Healthy);
    assert_eq!(b.core().status(), HealthStatus::Healthy);
    assert!(a.core().metrics().uptime_since.is_some());
}

#[smol_potat::test]
async fn test_transitive_start_skips_healthy_units() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db"), &log);
    let api = FakePlugin::new(unit("api").with_dependencies(["db"]), &log);
    let web = FakePlugin::new(unit("web").with_dependencies(["api", "db"]), &log);
    for plugin in [&db, &api, &web] {
        registry.register(plugin.clone()).await.unwrap();
    }

    registry.start_service("db").await.unwrap();
    registry.start_service("web").await.unwrap();
    registry.start_service("web").await.unwrap();

    assert_eq!(calls(&log), vec!["start:db", "start:api", "start:web"]);
    assert_eq!(db.starts(), 1);
    assert_eq!(web.starts(), 1);
}

#[smol_potat::test]
async fn test_dependency_failure_aborts_start() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db").with_retry_attempts(1), &log);
    db.start_failures.store(1, Ordering::SeqCst);
    let api = FakePlugin::new(unit("api").with_dependencies(["db"]), &log);
    registry.register(db.clone()).await.unwrap();
    registry.register(api.clone()).await.unwrap();

    let err = registry.start_service("api").await.unwrap_err();

    match err {
        Error::DependencyFailed {
            service,
            dependency,
            ..
        } => {
            assert_eq!(service, "api");
            assert_eq!(dependency, "db");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.starts(), 0);
    assert_eq!(db.core().status(), HealthStatus::Error);
    assert_ne!(api.core().status(), HealthStatus::Healthy);
}

#[smol_potat::test]
async fn test_degraded_dependency_blocks_dependent() {
    let log = call_log();
    let registry = Registry::default();
    let cache = FakePlugin::new(unit("cache"), &log);
    *cache.start_state.lock().unwrap() = Some(HealthState::degraded("warming up"));
    let api = FakePlugin::new(unit("api").with_dependencies(["cache"]), &log);
    registry.register(cache.clone()).await.unwrap();
    registry.register(api.clone()).await.unwrap();

    let err = registry.start_service("api").await.unwrap_err();

    assert!(matches!(
        err,
        Error::DependencyUnhealthy {
            status: HealthStatus::Degraded,
            ..
        }
    ));
    assert_eq!(cache.core().status(), HealthStatus::Degraded);
    assert_eq!(api.starts(), 0);
}

#[smol_potat::test]
async fn test_start_retries_then_succeeds() {
    let log = call_log();
    let registry = Registry::default();
    let flaky = FakePlugin::new(unit("flaky").with_retry_attempts(3), &log);
    flaky.start_failures.store(2, Ordering::SeqCst);
    registry.register(flaky.clone()).await.unwrap();

    registry.start_service("flaky").await.unwrap();

    assert_eq!(flaky.starts(), 3);
    assert_eq!(flaky.core().status(), HealthStatus::Healthy);
}

#[smol_potat::test]
async fn test_exhausted_retries_fire_on_error_once() {
    let log = call_log();
    let registry = Registry::default();
    let broken = FakePlugin::new(unit("broken").with_retry_attempts(2), &log);
    broken.start_failures.store(10, Ordering::SeqCst);
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    broken.core().on_error(move |_, _| {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    registry.register(broken.clone()).await.unwrap();

    assert!(registry.start_service("broken").await.is_err());

    assert_eq!(broken.starts(), 2);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    let health = broken.core().health();
    assert_eq!(health.status, HealthStatus::Error);
    assert!(health.error_message.unwrap().contains("refused to start"));
}

#[smol_potat::test]
async fn test_stop_cascades_to_dependents_first() {
    let log = call_log();
    let registry = Registry::default();
    // base <- left, base <- right, left/right <- top
    let base = FakePlugin::new(unit("base"), &log);
    let left = FakePlugin::new(unit("left").with_dependencies(["base"]), &log);
    let right = FakePlugin::new(unit("right").with_dependencies(["base"]), &log);
    let top = FakePlugin::new(unit("top").with_dependencies(["left", "right"]), &log);
    for plugin in [&base, &left, &right, &top] {
        registry.register(plugin.clone()).await.unwrap();
    }
    registry.start_service("top").await.unwrap();
    log.lock().unwrap().clear();

    registry.stop_service("base", true).await.unwrap();

    let stops = calls(&log);
    let pos = |entry: &str| stops.iter().position(|s| s == entry).unwrap();
    assert_eq!(stops.len(), 4);
    assert!(pos("stop:top") < pos("stop:left"));
    assert!(pos("stop:top") < pos("stop:right"));
    assert!(pos("stop:left") < pos("stop:base"));
    assert!(pos("stop:right") < pos("stop:base"));
    for plugin in [&base, &left, &right, &top] {
        assert_eq!(plugin.stops(), 1);
        assert_eq!(plugin.core().status(), HealthStatus::Stopped);
        assert!(plugin.core().metrics().uptime_since.is_none());
    }
}

#[smol_potat::test]
async fn test_stop_without_cascade() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db"), &log);
    let api = FakePlugin::new(unit("api").with_dependencies(["db"]), &log);
    registry.register(db.clone()).await.unwrap();
    registry.register(api.clone()).await.unwrap();
    registry.start_service("api").await.unwrap();

    registry.stop_service("db", false).await.unwrap();

    assert_eq!(db.stops(), 1);
    assert_eq!(api.stops(), 0);
    assert_eq!(api.core().status(), HealthStatus::Healthy);

    // Already stopped units are not stopped again
    registry.stop_service("db", false).await.unwrap();
    assert_eq!(db.stops(), 1);
}

#[smol_potat::test]
async fn test_dependent_stop_failure_keeps_dependency_running() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db"), &log);
    let api = FakePlugin::new(unit("api").with_dependencies(["db"]), &log);
    api.fail_stop.store(true, Ordering::SeqCst);
    registry.register(db.clone()).await.unwrap();
    registry.register(api.clone()).await.unwrap();
    registry.start_service("api").await.unwrap();

    let err = registry.stop_service("db", true).await.unwrap_err();

    assert!(matches!(err, Error::DependentStopFailed { ref dependent, .. } if dependent == "api"));
    assert_eq!(db.stops(), 0);
    assert_eq!(db.core().status(), HealthStatus::Healthy);
}

#[smol_potat::test]
async fn test_duplicate_registration_is_ignored() {
    let log = call_log();
    let registry = Registry::default();
    let first = FakePlugin::new(unit("search").with_dependencies(["db"]), &log);
    let second = FakePlugin::new(unit("search"), &log);

    assert!(registry.register(first.clone()).await.unwrap());
    assert!(!registry.register(second).await.unwrap());

    assert_eq!(registry.len(), 1);
    let kept = registry.get("search").unwrap();
    assert!(Arc::ptr_eq(
        kept.plugin(),
        &(first as Arc<dyn service_registry::ServicePlugin>)
    ));
    assert_eq!(registry.dependencies_of("search"), vec!["db".to_string()]);
}

#[smol_potat::test]
async fn test_shutdown_stops_each_unit_once_in_reverse_order() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db"), &log);
    let cache = FakePlugin::new(unit("cache"), &log);
    let api = FakePlugin::new(unit("api").with_dependencies(["db", "cache"]), &log);
    for plugin in [&db, &cache, &api] {
        registry.register(plugin.clone()).await.unwrap();
    }
    registry.start_service("api").await.unwrap();
    log.lock().unwrap().clear();

    registry.shutdown().await;

    assert_eq!(calls(&log), vec!["stop:api", "stop:cache", "stop:db"]);
    for plugin in [&db, &cache, &api] {
        assert_eq!(plugin.stops(), 1);
    }
    assert!(registry.is_empty());
    assert!(registry.dependents_of("db").is_empty());
}

#[smol_potat::test]
async fn test_startup_order() {
    let log = call_log();
    let registry = Registry::default();
    registry
        .register(FakePlugin::new(unit("web").with_dependencies(["api"]), &log))
        .await
        .unwrap();
    registry
        .register(FakePlugin::new(unit("api").with_dependencies(["db"]), &log))
        .await
        .unwrap();
    registry.register(FakePlugin::new(unit("db"), &log)).await.unwrap();

    assert_eq!(registry.startup_order().unwrap(), vec!["db", "api", "web"]);
}

#[smol_potat::test]
async fn test_start_waiting_on_shutdown_is_refused() {
    let log = call_log();
    let registry = Registry::default();
    let a = FakePlugin::new(unit("a"), &log);
    a.stop_delay_ms.store(200, Ordering::SeqCst);
    registry.register(a.clone()).await.unwrap();

    let ((), started) = futures::join!(registry.shutdown(), async {
        sleep(Duration::from_millis(50)).await;
        registry.start_service("a").await
    });

    assert!(matches!(started, Err(Error::ServiceNotFound(_))));
    assert_eq!(a.starts(), 0);
    assert_eq!(a.stops(), 1);
    assert_eq!(a.cleanups(), 1);
    assert_eq!(a.core().status(), HealthStatus::Stopped);
    assert!(registry.is_empty());
}

#[smol_potat::test]
async fn test_lifecycle_calls_waiting_on_unregister_are_refused() {
    let log = call_log();
    let registry = Registry::default();
    let a = FakePlugin::new(unit("a"), &log);
    a.stop_delay_ms.store(200, Ordering::SeqCst);
    registry.register(a.clone()).await.unwrap();

    let (removed, started, updated) = futures::join!(
        registry.unregister("a"),
        async {
            sleep(Duration::from_millis(50)).await;
            registry.start_service("a").await
        },
        async {
            sleep(Duration::from_millis(50)).await;
            registry.update_settings("a", Default::default()).await
        }
    );

    removed.unwrap();
    assert!(matches!(started, Err(Error::ServiceNotFound(_))));
    assert!(matches!(updated, Err(Error::ServiceNotFound(_))));
    assert_eq!(a.starts(), 0);
    assert_eq!(a.stops(), 1);
    assert_eq!(a.cleanups(), 1);
    assert_eq!(a.core().status(), HealthStatus::Stopped);
    assert!(!registry.contains("a"));
}
