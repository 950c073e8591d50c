//! Service manager facade
//!
//! The ServiceManager is what the outside world talks to: it aggregates
//! health and metrics across the fleet and turns lifecycle commands into
//! uniform [`ActionResult`]s so registry errors never leak past it.

use async_runtime_compat::{Spawner, TaskHandle};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use service_registry::{
    CapabilityType, HealthState, HealthStatus, Metrics, Registry, ServiceConfig, ServiceFilter,
    SystemHealth,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle verb accepted by [`ServiceManager::perform_action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Start the service and its dependencies
    Start,
    /// Stop the service and its dependents
    Stop,
    /// Stop then start the service
    Restart,
}

impl Action {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle command for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAction {
    /// Target service
    pub service_id: String,
    /// What to do
    pub action: Action,
}

/// Outcome of a lifecycle command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Target service
    pub service_id: String,
    /// Action that was attempted
    pub action: String,
    /// Whether it succeeded
    pub success: bool,
    /// Human readable outcome
    pub message: String,
}

impl ActionResult {
    fn from_outcome(
        service_id: &str,
        action: &str,
        outcome: service_registry::Result<()>,
    ) -> Self {
        let (success, message) = match outcome {
            Ok(()) => (true, format!("Service {} {} succeeded", service_id, action)),
            Err(e) => {
                warn!("Action {} on {} failed: {}", action, service_id, e);
                (false, e.to_string())
            }
        };
        Self {
            service_id: service_id.to_string(),
            action: action.to_string(),
            success,
            message,
        }
    }
}

/// One line of a service listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service id
    pub id: String,
    /// Display name
    pub name: String,
    /// Capability group
    pub capability_type: CapabilityType,
    /// Version
    pub version: String,
    /// Current status
    pub status: HealthStatus,
    /// Whether the service may be started
    pub enabled: bool,
    /// Tags
    pub tags: Vec<String>,
}

/// Everything known about one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDetail {
    /// Config snapshot
    pub config: ServiceConfig,
    /// Latest health observation
    pub health: HealthState,
    /// Request metrics
    pub metrics: Metrics,
    /// Declared dependencies
    pub dependencies: Vec<String>,
    /// Registered dependents
    pub dependents: Vec<String>,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Seconds since the last successful start, if running
    pub uptime_seconds: Option<u64>,
}

/// Fleet-wide request totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTotals {
    /// Requests across every service
    pub total_requests: u64,
    /// Successful requests across every service
    pub total_successes: u64,
    /// Failed requests across every service
    pub total_errors: u64,
    /// Mean latency weighted by request count
    pub average_latency_ms: f64,
    /// Percentage of successful requests, 100 when nothing was recorded
    pub success_rate: f64,
}

/// Per-service metrics plus fleet totals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Metrics by service id, in registration order
    pub services: IndexMap<String, Metrics>,
    /// Totals across every service
    pub totals: MetricsTotals,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Aggregate per-service metrics
    pub fn from_services(services: IndexMap<String, Metrics>) -> Self {
        let mut totals = MetricsTotals::default();
        let mut weighted_latency_ms = 0.0;
        for metrics in services.values() {
            totals.total_requests += metrics.request_count;
            totals.total_successes += metrics.success_count;
            totals.total_errors += metrics.error_count;
            weighted_latency_ms +=
                metrics.avg_latency.as_secs_f64() * 1000.0 * metrics.request_count as f64;
        }

        if totals.total_requests > 0 {
            let requests = totals.total_requests as f64;
            totals.average_latency_ms = weighted_latency_ms / requests;
            totals.success_rate = totals.total_successes as f64 / requests * 100.0;
        } else {
            totals.success_rate = 100.0;
        }

        Self {
            services,
            totals,
            timestamp: Utc::now(),
        }
    }
}

/// Management facade over the registry
pub struct ServiceManager {
    registry: Arc<Registry>,
    spawner: Arc<dyn Spawner>,
    monitor: Mutex<Option<TaskHandle>>,
}

impl ServiceManager {
    /// Create a manager over `registry`
    pub fn new(registry: Arc<Registry>, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            registry,
            spawner,
            monitor: Mutex::new(None),
        }
    }

    /// The underlying registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// List services matching `filter`
    pub fn list_services(&self, filter: &ServiceFilter) -> Vec<ServiceSummary> {
        self.registry
            .list(filter)
            .into_iter()
            .map(|unit| {
                let config = unit.config();
                ServiceSummary {
                    id: config.id.clone(),
                    name: config.name.clone(),
                    capability_type: config.capability_type,
                    version: config.version.clone(),
                    status: unit.status(),
                    enabled: config.enabled,
                    tags: config.tags.clone(),
                }
            })
            .collect()
    }

    /// Full detail for one service
    pub fn get_service_detail(&self, id: &str) -> Option<ServiceDetail> {
        let unit = self.registry.get(id)?;
        let view = unit.view();
        let uptime_seconds = view.metrics.uptime().map(|uptime| uptime.as_secs());
        Some(ServiceDetail {
            config: view.config,
            health: view.health,
            metrics: view.metrics,
            dependencies: self.registry.dependencies_of(id),
            dependents: self.registry.dependents_of(id),
            registered_at: view.registered_at,
            uptime_seconds,
        })
    }

    /// Start a service and its dependencies
    pub async fn start_service(&self, id: &str) -> ActionResult {
        info!("Starting service: {}", id);
        let outcome = self.registry.start_service(id).await;
        ActionResult::from_outcome(id, Action::Start.as_str(), outcome)
    }

    /// Stop a service and everything that depends on it
    pub async fn stop_service(&self, id: &str) -> ActionResult {
        info!("Stopping service: {}", id);
        let outcome = self.registry.stop_service(id, true).await;
        ActionResult::from_outcome(id, Action::Stop.as_str(), outcome)
    }

    /// Stop then start a service
    ///
    /// Dependents are left running across the restart.
    pub async fn restart_service(&self, id: &str) -> ActionResult {
        info!("Restarting service: {}", id);
        let outcome = match self.registry.stop_service(id, false).await {
            Ok(()) => self.registry.start_service(id).await,
            Err(e) => Err(e),
        };
        ActionResult::from_outcome(id, Action::Restart.as_str(), outcome)
    }

    /// Dispatch a lifecycle command
    pub async fn perform_action(&self, action: &ServiceAction) -> ActionResult {
        match action.action {
            Action::Start => self.start_service(&action.service_id).await,
            Action::Stop => self.stop_service(&action.service_id).await,
            Action::Restart => self.restart_service(&action.service_id).await,
        }
    }

    /// Replace a service's settings, restarting it if it was running
    pub async fn update_service_settings(
        &self,
        id: &str,
        settings: HashMap<String, serde_json::Value>,
    ) -> ActionResult {
        let outcome = self.registry.update_settings(id, settings).await;
        ActionResult::from_outcome(id, "update_settings", outcome)
    }

    /// Probe every service now, independent of their pollers
    pub async fn run_health_checks(&self) -> IndexMap<String, HealthState> {
        run_health_checks(&self.registry).await
    }

    /// Metrics of every service plus fleet totals
    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        let services = self
            .registry
            .list(&ServiceFilter::default())
            .into_iter()
            .map(|unit| (unit.id(), unit.metrics()))
            .collect();
        MetricsSnapshot::from_services(services)
    }

    /// Aggregate health of the fleet
    pub fn get_system_health(&self) -> SystemHealth {
        self.registry.system_health()
    }

    /// Sweep every service on `interval`, replacing any running sweep
    pub fn start_monitoring(&self, interval: Duration) {
        let registry = self.registry.clone();
        let handle = self.spawner.spawn_abortable(Box::pin(async move {
            loop {
                async_runtime_compat::runtime_utils::sleep(interval).await;
                let results = run_health_checks(&registry).await;
                let health = registry.system_health();
                info!(
                    "Health sweep: {:?}, {} services ({} healthy, {} degraded, {} unhealthy)",
                    health.overall_status,
                    results.len(),
                    health.healthy_count,
                    health.degraded_count,
                    health.unhealthy_count
                );
            }
        }));

        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            debug!("Replacing running health sweep");
            previous.abort();
        }
        info!("Health sweep every {:?}", interval);
    }

    /// Stop the sweep, if running
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            info!("Health sweep stopped");
        }
    }

    /// Whether a sweep is running
    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

async fn run_health_checks(registry: &Registry) -> IndexMap<String, HealthState> {
    let ids = registry.ids();
    let results = join_all(ids.iter().map(|id| registry.check_health(id))).await;

    ids.into_iter()
        .zip(results)
        .filter_map(|(id, result)| match result {
            Ok(state) => Some((id, state)),
            Err(e) => {
                // Unregistered while the sweep ran
                debug!("Skipping {} in health sweep: {}", id, e);
                None
            }
        })
        .collect()
}
