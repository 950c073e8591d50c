//! Plugin factory for creating units by plugin kind
//!
//! Maps `ServiceConfig::plugin` names to constructors so units can be built
//! from declarative configuration. Unknown kinds are rejected before anything
//! touches the registry.

use crate::{
    Error, Result,
    http::{HttpConnector, HttpServicePlugin},
    models::ServiceConfig,
    plugin::ServicePlugin,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Function type for creating plugin instances
pub type PluginConstructor =
    Box<dyn Fn(ServiceConfig) -> Result<Arc<dyn ServicePlugin>> + Send + Sync>;

/// Registry of plugin constructors keyed by kind
#[derive(Default)]
pub struct PluginFactory {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginFactory {
    /// Create a factory with no kinds registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory that knows the `http` kind
    pub fn with_http(connector: Arc<dyn HttpConnector>) -> Self {
        let mut factory = Self::new();
        factory.register("http", move |config| {
            let plugin = HttpServicePlugin::new(config, connector.clone())?;
            Ok(Arc::new(plugin) as Arc<dyn ServicePlugin>)
        });
        factory
    }

    /// Register or replace a constructor
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(ServiceConfig) -> Result<Arc<dyn ServicePlugin>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
    }

    /// Build a unit for `config`
    pub fn create(&self, config: ServiceConfig) -> Result<Arc<dyn ServicePlugin>> {
        let constructor =
            self.constructors
                .get(&config.plugin)
                .ok_or_else(|| Error::UnknownPlugin {
                    service: config.id.clone(),
                    plugin: config.plugin.clone(),
                })?;
        constructor(config)
    }

    /// Whether a kind is known
    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// All registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
