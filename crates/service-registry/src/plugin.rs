//! The contract every managed service unit implements.
//!
//! A plugin wraps one dependency (an LLM provider, an HTTP integration, a
//! cache, a database) and exposes four lifecycle calls to the registry.
//! Shared bookkeeping lives in [`PluginCore`], which every plugin embeds and
//! returns from [`ServicePlugin::core`]: the config snapshot, the current
//! [`HealthState`], the [`Metrics`] and the observer lists.

use crate::{
    Error, Result,
    models::{HealthState, HealthStatus, Metrics, ServiceConfig},
    observers::{ErrorObserver, HealthChangeObserver, LifecycleObserver, ObserverResult, Observers},
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Lifecycle contract for a managed service unit
///
/// The registry only calls `start` on a unit that is not already healthy and
/// bounds `start`, `stop` and `health_check` by the unit's configured
/// timeout.
#[async_trait]
pub trait ServicePlugin: Send + Sync {
    /// Shared bookkeeping for this unit
    fn core(&self) -> &PluginCore;

    /// One-time setup at registration, survives start/stop cycles
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Bring the unit up
    async fn start(&self) -> Result<()>;

    /// Bring the unit down, releasing owned resources before returning
    async fn stop(&self) -> Result<()>;

    /// Probe the unit without side effects
    async fn health_check(&self) -> Result<HealthState>;

    /// One-time teardown at unregistration
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Unit identifier
    fn id(&self) -> String {
        self.core().id()
    }

    /// Record the outcome of one request handled by this unit
    fn record_outcome(&self, success: bool, latency: Duration) {
        self.core().record_outcome(success, latency);
    }
}

/// Base adapter holding the state every plugin shares
///
/// Health and metrics each sit behind their own lock, so probes and request
/// accounting on one unit never contend with other units or with the
/// registry table.
pub struct PluginCore {
    config: RwLock<Arc<ServiceConfig>>,
    health: Mutex<HealthState>,
    metrics: Mutex<Metrics>,
    observers: Observers,
}

impl PluginCore {
    /// Create the core for a new unit
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            health: Mutex::new(HealthState::default()),
            metrics: Mutex::new(Metrics::default()),
            observers: Observers::default(),
        }
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<ServiceConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unit identifier
    pub fn id(&self) -> String {
        self.config().id.clone()
    }

    /// Swap in a new settings map, keeping identity and policy
    pub(crate) fn replace_settings(&self, settings: HashMap<String, serde_json::Value>) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        *config = Arc::new(config.with_settings(settings));
    }

    /// Latest health observation
    pub fn health(&self) -> HealthState {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest health status
    pub fn status(&self) -> HealthStatus {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Copy of the current metrics
    pub fn metrics(&self) -> Metrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the outcome of one request
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(success, latency);
    }

    /// Replace the health state, firing `on_health_change` if the status moved
    ///
    /// Returns whether the status changed.
    pub fn update_health(&self, new_state: HealthState) -> bool {
        let old_state = {
            let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *health, new_state.clone())
        };

        if old_state.status == new_state.status {
            return false;
        }

        let id = self.id();
        debug!(
            "Service {} health: {} -> {}",
            id, old_state.status, new_state.status
        );
        self.observers
            .on_health_change
            .notify(&id, |observer| observer(&id, &old_state, &new_state));
        true
    }

    /// Set a bare status with an optional message
    ///
    /// The last probe latency is carried over.
    pub fn set_status(&self, status: HealthStatus, message: Option<String>) -> bool {
        let mut state = HealthState::new(status);
        state.error_message = message;
        state.last_latency = self.health().last_latency;
        self.update_health(state)
    }

    /// Observer lists for this unit
    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    /// Observe successful starts
    pub fn on_start<F>(&self, observer: F)
    where
        F: Fn(&str) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers
            .on_start
            .register(Arc::new(observer) as Arc<LifecycleObserver>);
    }

    /// Observe successful stops
    pub fn on_stop<F>(&self, observer: F)
    where
        F: Fn(&str) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers
            .on_stop
            .register(Arc::new(observer) as Arc<LifecycleObserver>);
    }

    /// Observe health status transitions
    pub fn on_health_change<F>(&self, observer: F)
    where
        F: Fn(&str, &HealthState, &HealthState) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers
            .on_health_change
            .register(Arc::new(observer) as Arc<HealthChangeObserver>);
    }

    /// Observe lifecycle failures
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(&str, &Error) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers
            .on_error
            .register(Arc::new(observer) as Arc<ErrorObserver>);
    }

    pub(crate) fn mark_started(&self) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .uptime_since = Some(Utc::now());
        let id = self.id();
        self.observers.on_start.notify(&id, |observer| observer(&id));
    }

    pub(crate) fn mark_stopped(&self) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .uptime_since = None;
        let id = self.id();
        self.observers.on_stop.notify(&id, |observer| observer(&id));
    }

    pub(crate) fn notify_error(&self, err: &Error) {
        let id = self.id();
        self.observers.on_error.notify(&id, |observer| observer(&id, err));
    }
}
