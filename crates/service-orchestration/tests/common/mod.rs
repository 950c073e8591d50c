//! Common test utilities for orchestration integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use service_registry::{
    CapabilityType, Error, HealthState, PluginCore, PluginFactory, Registry, Result,
    ServiceConfig, ServicePlugin,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory unit whose probe result is set by the test
pub struct StubPlugin {
    core: PluginCore,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub probes: AtomicUsize,
    pub fail_start: AtomicBool,
    pub report: Mutex<HealthState>,
}

impl StubPlugin {
    pub fn new(config: ServiceConfig) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(config),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            report: Mutex::new(HealthState::healthy()),
        })
    }

    pub fn report(&self, state: HealthState) {
        *self.report.lock().unwrap() = state;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServicePlugin for StubPlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::lifecycle(self.id(), "start", "stub refused"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthState> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.report.lock().unwrap().clone())
    }
}

/// Config with polling disabled and one retry
pub fn unit(id: &str, capability: CapabilityType) -> ServiceConfig {
    ServiceConfig::new(id, id)
        .with_capability(capability)
        .with_interval(0)
        .with_retry_attempts(1)
}

/// Register a stub and bring it to the reported state
pub async fn add_unit(registry: &Registry, config: ServiceConfig, state: HealthState) -> Arc<StubPlugin> {
    let id = config.id.clone();
    let stub = StubPlugin::new(config);
    stub.report(state);
    registry.register(stub.clone()).await.unwrap();
    registry.check_health(&id).await.unwrap();
    stub
}

/// Healthy state with a fixed probe latency
pub fn healthy_in(millis: u64) -> HealthState {
    HealthState::healthy().with_latency(Duration::from_millis(millis))
}

/// Factory that builds stubs for the `stub` kind
pub fn stub_factory() -> PluginFactory {
    let mut factory = PluginFactory::new();
    factory.register("stub", |config| {
        let stub = StubPlugin::new(config);
        Ok(stub as Arc<dyn ServicePlugin>)
    });
    factory
}
