//! Runtime-agnostic registry of managed service units
//!
//! This crate tracks pluggable service units (an LLM provider, an HTTP
//! integration, a cache, a database), their health and request metrics, and
//! drives their lifecycle in dependency order.
//!
//! # Architecture
//!
//! - [`ServicePlugin`] is the contract every unit implements. Plugins embed a
//!   [`PluginCore`] holding their config, health, metrics and observers.
//! - [`Registry`] owns the registered units and their dependency graph,
//!   starts dependencies before dependents, stops dependents before
//!   dependencies, and runs one background health poller per unit.
//! - [`PluginFactory`] builds units from configuration by plugin kind.
//! - [`HttpServicePlugin`] is the reference adapter for HTTP-backed units.
//!
//! The registry is runtime-agnostic: pollers are spawned through an
//! [`async_runtime_compat::Spawner`].
//!
//! # Example
//!
//! ```no_run
//! use service_registry::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(api: Arc<dyn ServicePlugin>) -> service_registry::Result<()> {
//! let registry = Registry::default();
//! registry.register(api).await?;
//!
//! // Starts every dependency of "api" first
//! registry.start_service("api").await?;
//! println!("{:?}", registry.system_health().overall_status);
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod factory;
pub mod graph;
pub mod http;
pub mod models;
pub mod observers;
pub mod plugin;
pub mod registry;

#[cfg(feature = "http-client")]
pub mod reqwest_client;

pub use error::{Error, Result};
pub use factory::PluginFactory;
pub use graph::DependencyGraph;
pub use http::{HttpConnector, HttpServicePlugin, HttpTransport, TransportError};
pub use models::*;
pub use plugin::{PluginCore, ServicePlugin};
pub use registry::{
    OverallStatus, Registry, ServiceFilter, SystemHealth, Unit, UnitView,
};

#[cfg(feature = "http-client")]
pub use reqwest_client::ReqwestConnector;

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        CapabilityType, Error, HealthState, HealthStatus, Metrics, OverallStatus, PluginCore,
        PluginFactory, Registry, Result, ServiceConfig, ServiceFilter, ServicePlugin,
        SystemHealth, Unit,
    };
    pub use async_trait::async_trait;
}
