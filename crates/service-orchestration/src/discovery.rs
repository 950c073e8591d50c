//! Service discovery from declarative configuration and pluggable sources
//!
//! Discovery only produces [`ServiceConfig`] values; it never touches the
//! registry. A failing source or a malformed entry is logged and skipped so
//! one bad input never aborts the sweep.

use crate::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use service_registry::ServiceConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A source of service configurations
#[async_trait]
pub trait DiscoveryPlugin: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce service configurations
    async fn discover(&self) -> Result<Vec<ServiceConfig>>;
}

/// Source returning a fixed list of configurations
pub struct StaticSource {
    name: String,
    configs: Vec<ServiceConfig>,
}

impl StaticSource {
    /// Create a source from ready-made configurations
    pub fn new(name: impl Into<String>, configs: Vec<ServiceConfig>) -> Self {
        Self {
            name: name.into(),
            configs,
        }
    }
}

#[async_trait]
impl DiscoveryPlugin for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn discover(&self) -> Result<Vec<ServiceConfig>> {
        Ok(self.configs.clone())
    }
}

/// Source mapping `id -> fields` entries into configurations
///
/// Missing fields take the [`ServiceConfig`] serde defaults, the map key
/// becomes the id and an empty name falls back to the id.
#[derive(Debug, Clone, Default)]
pub struct DeclarativeSource {
    entries: IndexMap<String, Value>,
}

impl DeclarativeSource {
    /// Create a source over declarative entries
    pub fn new(entries: IndexMap<String, Value>) -> Self {
        Self { entries }
    }

    /// Number of entries, valid or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse every valid entry, skipping malformed ones
    pub fn parse(&self) -> Vec<ServiceConfig> {
        self.entries
            .iter()
            .filter_map(|(id, fields)| match parse_entry(id, fields) {
                Ok(config) => Some(config),
                Err(reason) => {
                    warn!("Skipping service entry '{}': {}", id, reason);
                    None
                }
            })
            .collect()
    }
}

fn parse_entry(id: &str, fields: &Value) -> std::result::Result<ServiceConfig, String> {
    let mut object = match fields {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => return Err(format!("expected a mapping, found {}", other)),
    };

    if let Some(declared) = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|declared| *declared != id)
    {
        warn!("Entry '{}' declares id '{}', using the key", id, declared);
    }
    object.insert("id".to_string(), Value::String(id.to_string()));

    let mut config: ServiceConfig =
        serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())?;
    if config.name.trim().is_empty() {
        config.name = id.to_string();
    }
    Ok(config)
}

/// Runs the declarative source and every registered discovery plugin
#[derive(Default)]
pub struct ServiceDiscovery {
    declarative: DeclarativeSource,
    plugins: Vec<Arc<dyn DiscoveryPlugin>>,
}

impl ServiceDiscovery {
    /// Create discovery over declarative entries
    pub fn new(entries: IndexMap<String, Value>) -> Self {
        Self {
            declarative: DeclarativeSource::new(entries),
            plugins: Vec::new(),
        }
    }

    /// Add a discovery plugin
    pub fn add_plugin(&mut self, plugin: Arc<dyn DiscoveryPlugin>) {
        debug!("Added discovery plugin {}", plugin.name());
        self.plugins.push(plugin);
    }

    /// Number of registered plugins
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Discover configurations from every source
    ///
    /// Declarative entries come first, then each plugin in registration
    /// order.
    pub async fn discover_services(&self) -> Vec<ServiceConfig> {
        let mut configs = self.declarative.parse();

        for plugin in &self.plugins {
            match plugin.discover().await {
                Ok(found) => {
                    debug!("Plugin {} discovered {} services", plugin.name(), found.len());
                    configs.extend(found);
                }
                Err(e) => {
                    warn!("Discovery plugin {} failed: {}", plugin.name(), e);
                }
            }
        }

        info!("Discovered {} services", configs.len());
        configs
    }
}
