//! Integration tests for background health polling and aggregate health

use async_runtime_compat::runtime_utils::sleep;
use service_registry::{HealthState, HealthStatus, OverallStatus, Registry, ServicePlugin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;
use common::*;

#[smol_potat::test]
async fn test_failing_probe_records_error_and_polling_continues() {
    let log = call_log();
    let registry = Registry::default();
    let flaky = FakePlugin::new(unit("flaky").with_interval(1), &log);
    flaky.set_probe(ProbeMode::Fail("connection refused".into()));
    registry.register(flaky.clone()).await.unwrap();

    sleep(Duration::from_millis(2500)).await;

    let health = flaky.core().health();
    assert_eq!(health.status, HealthStatus::Error);
    assert!(health.error_message.unwrap().contains("connection refused"));
    assert!(flaky.probes() >= 2, "poller stopped after a failed probe");

    flaky.set_probe(ProbeMode::Report(HealthState::healthy()));
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(flaky.core().status(), HealthStatus::Healthy);

    registry.shutdown().await;
}

#[smol_potat::test]
async fn test_panicking_probe_is_contained() {
    let log = call_log();
    let registry = Registry::default();
    let wild = FakePlugin::new(unit("wild").with_interval(1), &log);
    wild.set_probe(ProbeMode::Panic);
    registry.register(wild.clone()).await.unwrap();

    sleep(Duration::from_millis(2500)).await;

    assert_eq!(wild.core().status(), HealthStatus::Error);
    assert!(wild.probes() >= 2);
    registry.shutdown().await;
}

#[smol_potat::test]
async fn test_no_probe_after_shutdown() {
    let log = call_log();
    let registry = Registry::default();
    let polled = FakePlugin::new(unit("polled").with_interval(1), &log);
    registry.register(polled.clone()).await.unwrap();
    assert!(registry.get("polled").unwrap().has_poller());

    sleep(Duration::from_millis(1300)).await;
    registry.shutdown().await;
    let probes = polled.probes();
    assert!(probes >= 1);

    sleep(Duration::from_millis(2200)).await;
    assert_eq!(polled.probes(), probes);
    assert_eq!(polled.stops(), 1);
}

#[smol_potat::test]
async fn test_unregister_cancels_poller() {
    let log = call_log();
    let registry = Registry::default();
    let polled = FakePlugin::new(unit("polled").with_interval(1), &log);
    registry.register(polled.clone()).await.unwrap();

    registry.unregister("polled").await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(polled.probes(), 0);
}

#[smol_potat::test]
async fn test_health_change_fires_once_per_transition() {
    let log = call_log();
    let registry = Registry::default();
    let cache = FakePlugin::new(unit("cache"), &log);
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let t = transitions.clone();
    cache.core().on_health_change(move |_, old, new| {
        t.lock().unwrap().push((old.status, new.status));
        Ok(())
    });
    registry.register(cache.clone()).await.unwrap();

    for _ in 0..3 {
        registry.check_health("cache").await.unwrap();
    }
    cache.set_probe(ProbeMode::Report(HealthState::degraded("evicting")));
    for _ in 0..2 {
        registry.check_health("cache").await.unwrap();
    }

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (HealthStatus::Unknown, HealthStatus::Healthy),
            (HealthStatus::Healthy, HealthStatus::Degraded),
        ]
    );
    assert_eq!(cache.probes(), 5);
}

#[smol_potat::test]
async fn test_probe_error_notifies_on_transition_only() {
    let log = call_log();
    let registry = Registry::default();
    let db = FakePlugin::new(unit("db"), &log);
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    db.core().on_error(move |_, _| {
        e.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    db.set_probe(ProbeMode::Fail("disk full".into()));
    registry.register(db.clone()).await.unwrap();

    registry.check_health("db").await.unwrap();
    registry.check_health("db").await.unwrap();

    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[smol_potat::test]
async fn test_system_health_degraded_then_unhealthy() {
    let log = call_log();
    let registry = Registry::default();
    let healthy = FakePlugin::new(unit("healthy"), &log);
    let degraded = FakePlugin::new(unit("degraded"), &log);
    degraded.set_probe(ProbeMode::Report(HealthState::degraded("slow")));
    registry.register(healthy.clone()).await.unwrap();
    registry.register(degraded.clone()).await.unwrap();
    registry.check_health("healthy").await.unwrap();
    registry.check_health("degraded").await.unwrap();

    let summary = registry.system_health();
    assert_eq!(summary.overall_status, OverallStatus::Degraded);
    assert_eq!(summary.total_units, 2);
    assert_eq!(summary.healthy_count, 1);
    assert_eq!(summary.degraded_count, 1);

    let failing = FakePlugin::new(unit("failing"), &log);
    failing.set_probe(ProbeMode::Report(HealthState::unhealthy("down")));
    registry.register(failing.clone()).await.unwrap();
    registry.check_health("failing").await.unwrap();

    let summary = registry.system_health();
    assert_eq!(summary.overall_status, OverallStatus::Unhealthy);
    assert_eq!(summary.unhealthy_count, 1);
    assert_eq!(summary.per_status_counts["unhealthy"], 1);
}

#[smol_potat::test]
async fn test_metrics_recorded_through_unit() {
    let log = call_log();
    let registry = Registry::default();
    registry
        .register(FakePlugin::new(unit("llm"), &log))
        .await
        .unwrap();
    let llm = registry.get("llm").unwrap();

    llm.record_outcome(true, Duration::from_millis(100));
    llm.record_outcome(true, Duration::from_millis(300));
    llm.record_outcome(false, Duration::from_millis(200));

    let metrics = llm.metrics();
    assert_eq!(metrics.request_count, 3);
    assert_eq!(metrics.error_count, 1);
    assert!((metrics.avg_latency.as_secs_f64() - 0.2).abs() < 1e-6);
    assert!((metrics.success_rate() + metrics.error_rate() - 100.0).abs() < 1e-9);
    assert!(metrics.last_request_at.is_some());
}
