//! Common test utilities for service registry integration tests

#![allow(dead_code)]

use async_runtime_compat::runtime_utils::sleep;
use async_trait::async_trait;
use service_registry::{Error, HealthState, PluginCore, Result, ServiceConfig, ServicePlugin};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of lifecycle calls across plugins
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// How a fake plugin answers health probes
#[derive(Clone)]
pub enum ProbeMode {
    /// Return this state
    Report(HealthState),
    /// Return an error with this message
    Fail(String),
    /// Panic inside the probe
    Panic,
}

/// Scriptable plugin that records every call
pub struct FakePlugin {
    core: PluginCore,
    log: CallLog,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub probes: AtomicUsize,
    pub cleanups: AtomicUsize,
    /// Milliseconds each stop call takes
    pub stop_delay_ms: AtomicU64,
    /// Number of upcoming start calls that fail
    pub start_failures: AtomicU32,
    pub fail_stop: AtomicBool,
    /// State the plugin records on a successful start
    pub start_state: Mutex<Option<HealthState>>,
    pub probe_mode: Mutex<ProbeMode>,
}

impl FakePlugin {
    pub fn new(config: ServiceConfig, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            core: PluginCore::new(config),
            log: log.clone(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            stop_delay_ms: AtomicU64::new(0),
            start_failures: AtomicU32::new(0),
            fail_stop: AtomicBool::new(false),
            start_state: Mutex::new(None),
            probe_mode: Mutex::new(ProbeMode::Report(HealthState::healthy())),
        })
    }

    pub fn set_probe(&self, mode: ProbeMode) {
        *self.probe_mode.lock().unwrap() = mode;
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServicePlugin for FakePlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let id = self.id();
        let failing = self
            .start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.log.lock().unwrap().push(format!("start-failed:{}", id));
            return Err(Error::lifecycle(id, "start", "refused to start"));
        }

        self.log.lock().unwrap().push(format!("start:{}", id));
        if let Some(state) = self.start_state.lock().unwrap().clone() {
            self.core.update_health(state);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let delay = self.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        let id = self.id();
        if self.fail_stop.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push(format!("stop-failed:{}", id));
            return Err(Error::lifecycle(id, "stop", "refused to stop"));
        }
        self.log.lock().unwrap().push(format!("stop:{}", id));
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthState> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let mode = self.probe_mode.lock().unwrap().clone();
        match mode {
            ProbeMode::Report(state) => Ok(state),
            ProbeMode::Fail(message) => Err(Error::HealthCheck(message)),
            ProbeMode::Panic => panic!("probe exploded"),
        }
    }
}

/// New empty call log
pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a call log
pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Config with polling disabled
pub fn unit(id: &str) -> ServiceConfig {
    ServiceConfig::new(id, id).with_interval(0)
}

/// State with a fixed probe latency
pub fn healthy_in(millis: u64) -> HealthState {
    HealthState::healthy().with_latency(Duration::from_millis(millis))
}
