//! Load balancer over healthy units of one capability type

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use service_registry::{CapabilityType, Registry, ServiceFilter, Unit};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Instance selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through candidates with a per-capability counter
    RoundRobin,
    /// Fewest recorded requests
    LeastConnections,
    /// Lowest last probe latency
    #[default]
    HealthBased,
    /// Uniform random choice
    Random,
}

impl Strategy {
    /// Wire name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::HealthBased => "health_based",
            Strategy::Random => "random",
        }
    }

    /// Parse a strategy name, falling back to `health_based`
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown load-balancing strategy '{}', using health_based", name);
            Strategy::HealthBased
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Strategy::RoundRobin),
            "least_connections" => Ok(Strategy::LeastConnections),
            "health_based" => Ok(Strategy::HealthBased),
            "random" => Ok(Strategy::Random),
            other => Err(crate::Error::Config(format!(
                "Unknown load-balancing strategy: {}",
                other
            ))),
        }
    }
}

/// Picks one usable unit per request
pub struct LoadBalancer {
    registry: Arc<Registry>,
    default_strategy: Strategy,
    /// Round-robin counters by capability type
    counters: Mutex<HashMap<CapabilityType, usize>>,
}

impl LoadBalancer {
    /// Create a balancer using `health_based` by default
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_strategy(registry, Strategy::default())
    }

    /// Create a balancer with a different default strategy
    pub fn with_strategy(registry: Arc<Registry>, default_strategy: Strategy) -> Self {
        Self {
            registry,
            default_strategy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Strategy used by [`LoadBalancer::pick_default`]
    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    /// Pick with the default strategy
    pub fn pick_default(&self, capability: CapabilityType) -> Option<Arc<Unit>> {
        self.pick(capability, self.default_strategy)
    }

    /// Pick using a strategy name; unknown names use `health_based`
    pub fn pick_instance(&self, capability: CapabilityType, strategy: &str) -> Option<Arc<Unit>> {
        self.pick(capability, Strategy::parse_or_default(strategy))
    }

    /// Pick one healthy or degraded unit of `capability`
    ///
    /// Returns `None` when no instance is available.
    pub fn pick(&self, capability: CapabilityType, strategy: Strategy) -> Option<Arc<Unit>> {
        let mut candidates: Vec<Arc<Unit>> = self
            .registry
            .list(&ServiceFilter::capability(capability))
            .into_iter()
            .filter(|unit| unit.status().is_usable())
            .collect();

        if candidates.len() <= 1 {
            return candidates.pop();
        }

        let selected = match strategy {
            Strategy::RoundRobin => {
                let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
                let counter = counters.entry(capability).or_insert(0);
                let index = *counter % candidates.len();
                *counter = counter.wrapping_add(1);
                candidates.swap_remove(index)
            }
            // min_by_key keeps the first of equal minimums, i.e. registration order
            Strategy::LeastConnections => candidates
                .into_iter()
                .min_by_key(|unit| unit.metrics().request_count)?,
            Strategy::HealthBased => candidates
                .into_iter()
                .min_by_key(|unit| unit.health().last_latency)?,
            Strategy::Random => candidates.choose(&mut rand::thread_rng()).cloned()?,
        };

        debug!(
            "Selected {} for {} using {}",
            selected.id(),
            capability,
            strategy
        );
        Some(selected)
    }
}
