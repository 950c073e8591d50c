//! Service context carrying the orchestrator's shared components
//!
//! The context is built once at process start and handed to whatever serves
//! the outside world. Nothing happens on construction: [`ServiceContext::initialize`]
//! and [`ServiceContext::shutdown`] are explicit calls.

use crate::{
    ServiceDiscovery,
    balancer::{LoadBalancer, Strategy},
    config::{ManagerSettings, OrchestratorConfig},
    manager::ServiceManager,
};
use async_runtime_compat::Spawner;
use serde::{Deserialize, Serialize};
use service_registry::{PluginFactory, Registry};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What [`ServiceContext::initialize`] did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitSummary {
    /// Ids registered by this call
    pub registered: Vec<String>,
    /// Ids auto-started successfully
    pub started: Vec<String>,
    /// Ids that could not be built, registered or started, with the reason
    pub failed: Vec<(String, String)>,
}

/// Context object for service orchestration
///
/// Owns the registry, manager, balancer, discovery and plugin factory.
pub struct ServiceContext {
    /// Runtime spawner for pollers and the manager sweep
    pub spawner: Arc<dyn Spawner>,

    /// Registry of every unit
    pub registry: Arc<Registry>,

    /// Management facade
    pub manager: Arc<ServiceManager>,

    /// Load balancer over the registry
    pub balancer: Arc<LoadBalancer>,

    discovery: ServiceDiscovery,
    factory: PluginFactory,
    settings: ManagerSettings,
}

impl ServiceContext {
    /// Create a context from configuration
    pub fn new(spawner: Arc<dyn Spawner>, factory: PluginFactory, config: OrchestratorConfig) -> Self {
        let registry = Arc::new(Registry::new(spawner.clone()));
        let manager = Arc::new(ServiceManager::new(registry.clone(), spawner.clone()));
        let strategy = Strategy::parse_or_default(&config.manager.default_strategy);
        let balancer = Arc::new(LoadBalancer::with_strategy(registry.clone(), strategy));

        Self {
            spawner,
            registry,
            manager,
            balancer,
            discovery: ServiceDiscovery::new(config.services),
            factory,
            settings: config.manager,
        }
    }

    /// Discovery, for adding plugins before [`ServiceContext::initialize`]
    pub fn discovery_mut(&mut self) -> &mut ServiceDiscovery {
        &mut self.discovery
    }

    /// Manager settings in effect
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Discover, register and auto-start services, then start the sweep
    ///
    /// Individual failures are logged and reported in the summary; they never
    /// abort initialization.
    pub async fn initialize(&self) -> InitSummary {
        let mut summary = InitSummary::default();

        for config in self.discovery.discover_services().await {
            let id = config.id.clone();
            let plugin = match self.factory.create(config) {
                Ok(plugin) => plugin,
                Err(e) => {
                    error!("Cannot build service {}: {}", id, e);
                    summary.failed.push((id, e.to_string()));
                    continue;
                }
            };

            match self.registry.register(plugin).await {
                Ok(true) => summary.registered.push(id),
                Ok(false) => {}
                Err(e) => {
                    error!("Cannot register service {}: {}", id, e);
                    summary.failed.push((id, e.to_string()));
                }
            }
        }

        let order = self.registry.startup_order().unwrap_or_else(|e| {
            warn!("Falling back to registration order: {}", e);
            self.registry.ids()
        });
        for id in order {
            let Some(unit) = self.registry.get(&id) else {
                continue;
            };
            let config = unit.config();
            if !config.enabled || !config.auto_start {
                continue;
            }

            let result = self.manager.start_service(&id).await;
            if result.success {
                summary.started.push(id);
            } else {
                summary.failed.push((id, result.message));
            }
        }

        if let Some(interval) = self.settings.sweep_interval() {
            self.manager.start_monitoring(interval);
        }

        info!(
            "Initialized {} services ({} started, {} failed)",
            summary.registered.len(),
            summary.started.len(),
            summary.failed.len()
        );
        summary
    }

    /// Stop the sweep and shut down every unit
    pub async fn shutdown(&self) {
        self.manager.stop_monitoring();
        self.registry.shutdown().await;
        info!("Service context shut down");
    }
}
