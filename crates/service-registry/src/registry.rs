//! Core service registry implementation
//!
//! The registry owns every registered [`Unit`], the dependency graph between
//! them and one background health poller per unit with polling enabled.
//!
//! Structural state (unit table and graph) sits behind a single lock that is
//! never held across an await. Health and metrics belong to each unit's
//! [`PluginCore`], so pollers never contend on the registry lock. Each unit
//! also has a probe gate: lifecycle calls and probes on the same unit are
//! serialized through it, which is what lets [`Registry::shutdown`] guarantee
//! that no probe is in flight once it starts stopping units.

use crate::{
    Error, Result,
    graph::DependencyGraph,
    models::{CapabilityType, HealthState, HealthStatus, Metrics, ServiceConfig},
    observers::panic_message,
    plugin::{PluginCore, ServicePlugin},
};
use async_runtime_compat::{Spawner, TaskHandle, default_spawner, runtime_utils};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A registered service unit
///
/// Pairs a live plugin with its registration bookkeeping. Callers outside
/// the registry only get read access plus [`Unit::record_outcome`].
pub struct Unit {
    plugin: Arc<dyn ServicePlugin>,
    registered_at: DateTime<Utc>,
    registered: AtomicBool,
    /// Serializes probes and lifecycle calls on this unit
    gate: futures::lock::Mutex<()>,
    poller: Mutex<Option<TaskHandle>>,
}

impl Unit {
    fn new(plugin: Arc<dyn ServicePlugin>) -> Self {
        Self {
            plugin,
            registered_at: Utc::now(),
            registered: AtomicBool::new(true),
            gate: futures::lock::Mutex::new(()),
            poller: Mutex::new(None),
        }
    }

    fn core(&self) -> &PluginCore {
        self.plugin.core()
    }

    /// Unit identifier
    pub fn id(&self) -> String {
        self.core().id()
    }

    /// The live plugin
    pub fn plugin(&self) -> &Arc<dyn ServicePlugin> {
        &self.plugin
    }

    /// Current config snapshot
    pub fn config(&self) -> Arc<ServiceConfig> {
        self.core().config()
    }

    /// Latest health observation
    pub fn health(&self) -> HealthState {
        self.core().health()
    }

    /// Latest health status
    pub fn status(&self) -> HealthStatus {
        self.core().status()
    }

    /// Copy of the unit's metrics
    pub fn metrics(&self) -> Metrics {
        self.core().metrics()
    }

    /// Record the outcome of one request routed to this unit
    pub fn record_outcome(&self, success: bool, latency: Duration) {
        self.plugin.record_outcome(success, latency);
    }

    /// When the unit was registered
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Whether the unit is still registered
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Whether a background poller is attached
    pub fn has_poller(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Serializable snapshot of the unit
    pub fn view(&self) -> UnitView {
        UnitView {
            config: self.config().as_ref().clone(),
            health: self.health(),
            metrics: self.metrics(),
            registered_at: self.registered_at,
        }
    }

    /// Fails once the unit has been torn down by unregister or shutdown
    fn ensure_registered(&self) -> Result<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(Error::ServiceNotFound(self.id()))
        }
    }

    /// Mark unregistered and cancel the poller
    fn retire(&self) {
        self.registered.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Point-in-time copy of a unit's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitView {
    /// Config snapshot
    pub config: ServiceConfig,
    /// Latest health observation
    pub health: HealthState,
    /// Metrics
    pub metrics: Metrics,
    /// Registration time
    pub registered_at: DateTime<Utc>,
}

/// Query filter for [`Registry::list`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFilter {
    /// Only units of this capability type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_type: Option<CapabilityType>,
    /// Only units currently in this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HealthStatus>,
}

impl ServiceFilter {
    /// Filter on capability type
    pub fn capability(capability_type: CapabilityType) -> Self {
        Self {
            capability_type: Some(capability_type),
            status: None,
        }
    }

    /// Filter on status
    pub fn status(status: HealthStatus) -> Self {
        Self {
            capability_type: None,
            status: Some(status),
        }
    }

    fn matches(&self, unit: &Unit) -> bool {
        self.capability_type
            .is_none_or(|capability| unit.config().capability_type == capability)
            && self.status.is_none_or(|status| unit.status() == status)
    }
}

/// Fleet-wide health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every unit is healthy
    Healthy,
    /// No unit is unhealthy but at least one is degraded
    Degraded,
    /// At least one unit is unhealthy
    Unhealthy,
    /// Anything else, e.g. a partially started fleet
    Unknown,
}

/// Aggregate health of every registered unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Fleet-wide verdict
    pub overall_status: OverallStatus,
    /// Number of registered units
    pub total_units: usize,
    /// Units reporting healthy
    pub healthy_count: usize,
    /// Units reporting degraded
    pub degraded_count: usize,
    /// Units reporting unhealthy
    pub unhealthy_count: usize,
    /// Count for every status, including zeroes
    pub per_status_counts: BTreeMap<String, usize>,
    /// When the summary was taken
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    /// Summarize a set of unit statuses
    pub fn from_statuses(statuses: impl IntoIterator<Item = HealthStatus>) -> Self {
        let mut counts: HashMap<HealthStatus, usize> = HashMap::new();
        let mut total_units = 0;
        for status in statuses {
            *counts.entry(status).or_default() += 1;
            total_units += 1;
        }
        let count = |status: HealthStatus| counts.get(&status).copied().unwrap_or(0);

        let overall_status = if count(HealthStatus::Unhealthy) > 0 {
            OverallStatus::Unhealthy
        } else if count(HealthStatus::Degraded) > 0 {
            OverallStatus::Degraded
        } else if count(HealthStatus::Healthy) == total_units {
            OverallStatus::Healthy
        } else {
            OverallStatus::Unknown
        };

        Self {
            overall_status,
            total_units,
            healthy_count: count(HealthStatus::Healthy),
            degraded_count: count(HealthStatus::Degraded),
            unhealthy_count: count(HealthStatus::Unhealthy),
            per_status_counts: HealthStatus::ALL
                .iter()
                .map(|status| (status.as_str().to_string(), count(*status)))
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Tables {
    units: IndexMap<String, Arc<Unit>>,
    graph: DependencyGraph,
}

/// Registry of service units with dependency-ordered lifecycle
pub struct Registry {
    tables: RwLock<Tables>,
    spawner: Arc<dyn Spawner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(default_spawner())
    }
}

impl Registry {
    /// Create an empty registry that spawns pollers on `spawner`
    pub fn new(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            spawner,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a unit
    ///
    /// Returns `Ok(false)` if the id is already registered; the existing unit
    /// is left untouched. Cyclic dependency declarations are rejected.
    pub async fn register(&self, plugin: Arc<dyn ServicePlugin>) -> Result<bool> {
        let config = plugin.core().config();
        let id = config.id.clone();

        {
            let tables = self.read();
            if tables.units.contains_key(&id) {
                warn!("Service {} is already registered, ignoring", id);
                return Ok(false);
            }
            tables.graph.check_acyclic(&id, &config.dependency_ids)?;
        }

        if let Err(e) = bounded(&config, "initialize", plugin.initialize()).await {
            error!("Failed to initialize service {}: {}", id, e);
            plugin.core().notify_error(&e);
            return Err(e);
        }

        let unit = Arc::new(Unit::new(plugin));
        let rejected = {
            let mut tables = self.write();
            if tables.units.contains_key(&id) {
                Some(None)
            } else if let Err(e) = tables.graph.check_acyclic(&id, &config.dependency_ids) {
                Some(Some(e))
            } else {
                tables.graph.insert(&id, &config.dependency_ids);
                tables.units.insert(id.clone(), unit.clone());
                None
            }
        };

        if let Some(rejection) = rejected {
            // Lost a race with a concurrent registration
            if let Err(e) = bounded(&config, "cleanup", unit.plugin.cleanup()).await {
                warn!("Cleanup of rejected service {} failed: {}", id, e);
            }
            return match rejection {
                Some(e) => Err(e),
                None => {
                    warn!("Service {} is already registered, ignoring", id);
                    Ok(false)
                }
            };
        }

        if let Some(interval) = config.health_check_interval() {
            let handle = self
                .spawner
                .spawn_abortable(Box::pin(poll_loop(unit.clone(), interval)));
            *unit.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
            debug!("Health poller for {} every {:?}", id, interval);
        }

        info!(
            "Registered service {} ({}, {} dependencies)",
            id,
            config.capability_type,
            config.dependency_ids.len()
        );
        Ok(true)
    }

    /// Unregister a unit, stopping and cleaning it up
    ///
    /// The unit is removed even if `stop` or `cleanup` fails; the first
    /// failure is returned.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let unit = self
            .get(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        unit.retire();

        let outcome = {
            let _gate = unit.gate.lock().await;
            let stopped = stop_locked(&unit).await;
            let cleaned = bounded(&unit.config(), "cleanup", unit.plugin.cleanup()).await;
            if let Err(e) = &cleaned {
                warn!("Cleanup of service {} failed: {}", id, e);
            }
            stopped.and(cleaned)
        };

        {
            let mut tables = self.write();
            tables.units.shift_remove(id);
            tables.graph.remove(id);
        }
        info!("Unregistered service {}", id);
        outcome
    }

    /// Look up a unit
    pub fn get(&self, id: &str) -> Option<Arc<Unit>> {
        self.read().units.get(id).cloned()
    }

    /// Whether a unit is registered
    pub fn contains(&self, id: &str) -> bool {
        self.read().units.contains_key(id)
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.read().units.len()
    }

    /// Whether no units are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.read().units.keys().cloned().collect()
    }

    /// Units matching `filter`, in registration order
    pub fn list(&self, filter: &ServiceFilter) -> Vec<Arc<Unit>> {
        let units: Vec<Arc<Unit>> = self.read().units.values().cloned().collect();
        units.into_iter().filter(|u| filter.matches(u)).collect()
    }

    /// Declared dependencies of a unit
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.read().graph.dependencies_of(id)
    }

    /// Registered units that depend on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.read().graph.dependents_of(id)
    }

    /// Registered ids ordered dependencies first
    pub fn startup_order(&self) -> Result<Vec<String>> {
        let tables = self.read();
        let ids: Vec<String> = tables.units.keys().cloned().collect();
        tables.graph.topological_order(&ids)
    }

    /// Start a unit after recursively starting its dependencies
    pub async fn start_service(&self, id: &str) -> Result<()> {
        self.start_recursive(id.to_string()).await
    }

    fn start_recursive(&self, id: String) -> BoxFuture<'_, Result<()>> {
        async move {
            let unit = self
                .get(&id)
                .ok_or_else(|| Error::ServiceNotFound(id.clone()))?;
            unit.ensure_registered()?;
            if unit.status() == HealthStatus::Healthy {
                debug!("Service {} already healthy", id);
                return Ok(());
            }

            let config = unit.config();
            if !config.enabled {
                return Err(Error::Disabled(id));
            }

            for dependency in &config.dependency_ids {
                let dep_unit = self.get(dependency).ok_or_else(|| Error::DependencyNotFound {
                    service: id.clone(),
                    dependency: dependency.clone(),
                })?;
                if dep_unit.status() == HealthStatus::Healthy {
                    continue;
                }

                debug!("Starting dependency {} of {}", dependency, id);
                if let Err(e) = self.start_recursive(dependency.clone()).await {
                    warn!("Not starting {}: dependency {} failed: {}", id, dependency, e);
                    return Err(Error::DependencyFailed {
                        service: id.clone(),
                        dependency: dependency.clone(),
                        source: Box::new(e),
                    });
                }

                let status = dep_unit.status();
                if status != HealthStatus::Healthy {
                    warn!("Not starting {}: dependency {} is {}", id, dependency, status);
                    return Err(Error::DependencyUnhealthy {
                        service: id.clone(),
                        dependency: dependency.clone(),
                        status,
                    });
                }
            }

            let _gate = unit.gate.lock().await;
            unit.ensure_registered()?;
            if unit.status() == HealthStatus::Healthy {
                return Ok(());
            }
            start_locked(&unit).await
        }
        .boxed()
    }

    /// Stop a unit, first stopping everything that depends on it if
    /// `stop_dependents` is set
    pub async fn stop_service(&self, id: &str, stop_dependents: bool) -> Result<()> {
        let mut visited = HashSet::new();
        self.stop_recursive(id.to_string(), stop_dependents, &mut visited)
            .await
    }

    fn stop_recursive<'a>(
        &'a self,
        id: String,
        stop_dependents: bool,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if !visited.insert(id.clone()) {
                return Ok(());
            }
            let unit = self
                .get(&id)
                .ok_or_else(|| Error::ServiceNotFound(id.clone()))?;

            if stop_dependents {
                for dependent in self.dependents_of(&id) {
                    debug!("Stopping dependent {} of {}", dependent, id);
                    if let Err(e) = self
                        .stop_recursive(dependent.clone(), true, &mut *visited)
                        .await
                    {
                        warn!("Not stopping {}: dependent {} failed: {}", id, dependent, e);
                        return Err(Error::DependentStopFailed {
                            service: id.clone(),
                            dependent,
                            source: Box::new(e),
                        });
                    }
                }
            }

            let _gate = unit.gate.lock().await;
            unit.ensure_registered()?;
            stop_locked(&unit).await
        }
        .boxed()
    }

    /// Stop every unit and clear the registry
    ///
    /// Pollers are cancelled and any in-flight probe is waited out before the
    /// first `stop`, then units are stopped in reverse registration order
    /// without cascading, each exactly once.
    pub async fn shutdown(&self) {
        let units: Vec<Arc<Unit>> = self.read().units.values().cloned().collect();
        info!("Shutting down {} services", units.len());

        for unit in &units {
            unit.retire();
        }

        let mut gates = Vec::with_capacity(units.len());
        for unit in &units {
            gates.push(unit.gate.lock().await);
        }

        for unit in units.iter().rev() {
            if let Err(e) = stop_locked(unit).await {
                error!("Failed to stop {} during shutdown: {}", unit.id(), e);
            }
        }
        for unit in units.iter().rev() {
            if let Err(e) = bounded(&unit.config(), "cleanup", unit.plugin.cleanup()).await {
                warn!("Cleanup of {} failed during shutdown: {}", unit.id(), e);
            }
        }
        drop(gates);

        let mut tables = self.write();
        tables.units.clear();
        tables.graph = DependencyGraph::new();
        info!("Registry shut down");
    }

    /// Probe a unit immediately
    ///
    /// Goes through the same gate and edge-detecting update as the poller.
    pub async fn check_health(&self, id: &str) -> Result<HealthState> {
        let unit = self
            .get(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        Ok(probe_unit(&unit).await)
    }

    /// Replace a unit's settings, restarting it if it was running
    pub async fn update_settings(
        &self,
        id: &str,
        settings: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let unit = self
            .get(id)
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))?;
        let _gate = unit.gate.lock().await;
        unit.ensure_registered()?;

        let was_running = unit.status().is_usable();
        stop_locked(&unit).await?;
        unit.core().replace_settings(settings);
        info!("Updated settings for service {}", id);

        if !was_running {
            return Ok(());
        }

        for dependency in &unit.config().dependency_ids {
            let status = self
                .get(dependency)
                .map(|dep| dep.status())
                .ok_or_else(|| Error::DependencyNotFound {
                    service: id.to_string(),
                    dependency: dependency.clone(),
                })?;
            if status != HealthStatus::Healthy {
                return Err(Error::DependencyUnhealthy {
                    service: id.to_string(),
                    dependency: dependency.clone(),
                    status,
                });
            }
        }
        start_locked(&unit).await
    }

    /// Aggregate health of every registered unit
    pub fn system_health(&self) -> SystemHealth {
        let units: Vec<Arc<Unit>> = self.read().units.values().cloned().collect();
        SystemHealth::from_statuses(units.iter().map(|u| u.status()))
    }
}

/// Run a plugin call under the unit's timeout, turning panics into errors
async fn bounded<T>(
    config: &ServiceConfig,
    operation: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    let guarded = AssertUnwindSafe(future).catch_unwind();
    let outcome = match config.timeout() {
        Some(limit) => runtime_utils::timeout(limit, guarded)
            .await
            .map_err(|_| Error::Timeout {
                service: config.id.clone(),
                operation,
                seconds: config.timeout_seconds,
            })?,
        None => guarded.await,
    };

    outcome.unwrap_or_else(|panic| {
        Err(Error::lifecycle(
            config.id.clone(),
            operation,
            format!("panicked: {}", panic_message(panic.as_ref())),
        ))
    })
}

/// Start a unit whose gate is held and whose dependencies are healthy
async fn start_locked(unit: &Unit) -> Result<()> {
    let config = unit.config();
    let core = unit.core();
    let attempts = config.retry_attempts.max(1);

    info!("Starting service {}", config.id);
    core.set_status(HealthStatus::Starting, None);

    let mut last_error = None;
    for attempt in 1..=attempts {
        match bounded(&config, "start", unit.plugin.start()).await {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(e) => {
                warn!(
                    "Start attempt {}/{} for {} failed: {}",
                    attempt, attempts, config.id, e
                );
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error {
        error!("Failed to start service {}: {}", config.id, e);
        core.set_status(HealthStatus::Error, Some(e.to_string()));
        core.notify_error(&e);
        return Err(e);
    }

    if matches!(
        core.status(),
        HealthStatus::Starting | HealthStatus::Unknown | HealthStatus::Stopped
    ) {
        core.set_status(HealthStatus::Healthy, None);
    }
    core.mark_started();
    info!("Service {} started ({})", config.id, core.status());
    Ok(())
}

/// Stop a unit whose gate is held
async fn stop_locked(unit: &Unit) -> Result<()> {
    let config = unit.config();
    let core = unit.core();
    if core.status() == HealthStatus::Stopped {
        debug!("Service {} already stopped", config.id);
        return Ok(());
    }

    info!("Stopping service {}", config.id);
    match bounded(&config, "stop", unit.plugin.stop()).await {
        Ok(()) => {
            core.set_status(HealthStatus::Stopped, None);
            core.mark_stopped();
            Ok(())
        }
        Err(e) => {
            error!("Failed to stop service {}: {}", config.id, e);
            core.set_status(HealthStatus::Error, Some(e.to_string()));
            core.notify_error(&e);
            Err(e)
        }
    }
}

/// Probe a unit through its gate and apply the result
async fn probe_unit(unit: &Unit) -> HealthState {
    let _gate = unit.gate.lock().await;
    if !unit.is_registered() {
        return unit.health();
    }

    let config = unit.config();
    let started = Instant::now();
    let outcome = bounded(&config, "health_check", unit.plugin.health_check()).await;
    let elapsed = started.elapsed();

    let (state, failure) = match outcome {
        Ok(state) if state.last_latency.is_zero() => (state.with_latency(elapsed), None),
        Ok(state) => (state, None),
        Err(Error::Timeout { seconds, .. }) => (
            HealthState::unhealthy(format!("health check timed out after {}s", seconds))
                .with_latency(elapsed),
            None,
        ),
        Err(e) => {
            warn!("Health check of {} failed: {}", config.id, e);
            (HealthState::error(e.to_string()).with_latency(elapsed), Some(e))
        }
    };

    let changed = unit.core().update_health(state.clone());
    if let Some(e) = failure.filter(|_| changed) {
        unit.core().notify_error(&e);
    }
    state
}

/// Background health poller for one unit
///
/// Exits when the unit is unregistered; cancellation through the task handle
/// ends it at the next suspension point.
async fn poll_loop(unit: Arc<Unit>, interval: Duration) {
    loop {
        runtime_utils::sleep(interval).await;
        if !unit.is_registered() {
            debug!("Poller for {} exiting", unit.id());
            break;
        }
        probe_unit(&unit).await;
    }
}
