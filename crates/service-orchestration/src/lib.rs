//! # Service orchestration
//!
//! Discovery, load balancing and the management facade over the
//! [`service_registry`] crate.
//!
//! - [`ServiceDiscovery`] turns declarative configuration and pluggable
//!   sources into service configurations.
//! - [`LoadBalancer`] picks one usable instance of a capability type.
//! - [`ServiceManager`] aggregates health and metrics and runs lifecycle
//!   commands.
//! - [`ServiceContext`] wires them together and owns the init/shutdown pair.
//!
//! ## Example
//!
//! ```no_run
//! use service_orchestration::{OrchestratorConfig, ServiceContext};
//! use service_registry::{CapabilityType, PluginFactory};
//!
//! # async fn example(factory: PluginFactory) -> service_orchestration::Result<()> {
//! let config = OrchestratorConfig::from_file("services.yaml")?;
//! let context = ServiceContext::new(async_runtime_compat::default_spawner(), factory, config);
//!
//! context.initialize().await;
//! if let Some(unit) = context.balancer.pick_default(CapabilityType::Provider) {
//!     println!("routing to {}", unit.id());
//! }
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod balancer;
mod config;
mod context;
mod discovery;
mod manager;

pub use balancer::{LoadBalancer, Strategy};
pub use config::{ManagerSettings, OrchestratorConfig};
pub use context::{InitSummary, ServiceContext};
pub use discovery::{DeclarativeSource, DiscoveryPlugin, ServiceDiscovery, StaticSource};
pub use manager::{
    Action, ActionResult, MetricsSnapshot, MetricsTotals, ServiceAction, ServiceDetail,
    ServiceManager, ServiceSummary,
};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Service registry errors
    #[error("Service registry error: {0}")]
    Registry(#[from] service_registry::Error),

    /// A discovery source failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
