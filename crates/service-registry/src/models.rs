//! Data models for the service registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Category a service belongs to, used to group instances for load balancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityType {
    /// Core application services
    Core,
    /// External providers such as LLM APIs
    Provider,
    /// Third-party HTTP integrations
    Integration,
    /// Caches, databases and document stores
    Storage,
    /// Observability backends
    Monitoring,
    /// Anything else
    #[default]
    Utility,
}

impl CapabilityType {
    /// Every capability type, in declaration order
    pub const ALL: [CapabilityType; 6] = [
        CapabilityType::Core,
        CapabilityType::Provider,
        CapabilityType::Integration,
        CapabilityType::Storage,
        CapabilityType::Monitoring,
        CapabilityType::Utility,
    ];

    /// Wire name of the capability type
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityType::Core => "core",
            CapabilityType::Provider => "provider",
            CapabilityType::Integration => "integration",
            CapabilityType::Storage => "storage",
            CapabilityType::Monitoring => "monitoring",
            CapabilityType::Utility => "utility",
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::Error::Config(format!("Unknown capability type: {}", s)))
    }
}

/// Identity and policy for a managed service unit
///
/// Created once at registration time. Settings updates produce a new
/// snapshot rather than mutating a live one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Unique service identifier
    pub id: String,

    /// Capability group for load balancing
    #[serde(default)]
    pub capability_type: CapabilityType,

    /// Plugin kind used to construct the unit
    #[serde(default = "default_plugin")]
    pub plugin: String,

    /// Human readable name
    #[serde(default)]
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Service version
    #[serde(default = "default_version")]
    pub version: String,

    /// Plugin specific settings
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,

    /// URL probed by HTTP-backed plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,

    /// Seconds between background health checks, 0 disables polling
    #[serde(default = "default_interval")]
    pub health_check_interval_seconds: u64,

    /// Services that must be healthy before this one starts
    #[serde(default)]
    pub dependency_ids: BTreeSet<String>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Disabled services are tracked but never started
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Start automatically when loaded from discovery
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Start attempts before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Bound on start, stop and health check calls, 0 means unbounded
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_plugin() -> String {
    "http".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30
}

impl ServiceConfig {
    /// Create a config with default policy
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability_type: CapabilityType::default(),
            plugin: default_plugin(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            settings: HashMap::new(),
            health_check_url: None,
            health_check_interval_seconds: default_interval(),
            dependency_ids: BTreeSet::new(),
            tags: Vec::new(),
            enabled: true,
            auto_start: true,
            retry_attempts: default_retry_attempts(),
            timeout_seconds: default_timeout(),
        }
    }

    /// Set the capability type
    pub fn with_capability(mut self, capability_type: CapabilityType) -> Self {
        self.capability_type = capability_type;
        self
    }

    /// Set the plugin kind
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    /// Add dependencies
    pub fn with_dependencies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set the health check interval in seconds
    pub fn with_interval(mut self, seconds: u64) -> Self {
        self.health_check_interval_seconds = seconds;
        self
    }

    /// Set the operation timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the number of start attempts
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the health check URL
    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = Some(url.into());
        self
    }

    /// Insert a single setting
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Enable or disable the service
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Copy of this config with the settings map replaced
    pub fn with_settings(&self, settings: HashMap<String, serde_json::Value>) -> Self {
        Self {
            settings,
            ..self.clone()
        }
    }

    /// Polling interval, `None` when polling is disabled
    pub fn health_check_interval(&self) -> Option<Duration> {
        (self.health_check_interval_seconds > 0)
            .then(|| Duration::from_secs(self.health_check_interval_seconds))
    }

    /// Operation timeout, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// Health URL from the dedicated field or the `health_url` setting
    pub fn health_url(&self) -> Option<String> {
        self.health_check_url.clone().or_else(|| {
            self.settings
                .get("health_url")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }
}

/// Health status of a service unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Never checked
    #[default]
    Unknown,
    /// Start in progress
    Starting,
    /// Fully operational
    Healthy,
    /// Operational with reduced capacity
    Degraded,
    /// Not operational
    Unhealthy,
    /// Stopped on request
    Stopped,
    /// A probe or lifecycle call failed
    Error,
}

impl HealthStatus {
    /// Every status, in declaration order
    pub const ALL: [HealthStatus; 7] = [
        HealthStatus::Unknown,
        HealthStatus::Starting,
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
        HealthStatus::Stopped,
        HealthStatus::Error,
    ];

    /// Whether a unit in this status may receive work
    pub fn is_usable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Stopped => "stopped",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealthStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| crate::Error::Config(format!("Unknown health status: {}", s)))
    }
}

/// Result of the most recent health observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    /// Current status
    pub status: HealthStatus,

    /// When the observation was made
    pub last_checked_at: DateTime<Utc>,

    /// How long the probe took
    #[serde(rename = "last_latency_ms", with = "duration_ms")]
    pub last_latency: Duration,

    /// Failure detail, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Probe specific details
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl HealthState {
    /// New observation with the given status, timestamped now
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            last_checked_at: Utc::now(),
            last_latency: Duration::ZERO,
            error_message: None,
            details: HashMap::new(),
        }
    }

    /// Healthy observation
    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    /// Degraded observation with a reason
    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Degraded).with_error(message)
    }

    /// Unhealthy observation with a reason
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Unhealthy).with_error(message)
    }

    /// Error observation with the failure text
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Error).with_error(message)
    }

    /// Attach a failure message
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Attach the measured latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.last_latency = latency;
        self
    }

    /// Attach a detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(HealthStatus::Unknown)
    }
}

/// Rolling request counters for a service unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Requests processed
    pub request_count: u64,
    /// Requests that succeeded
    pub success_count: u64,
    /// Requests that failed
    pub error_count: u64,
    /// Incremental mean of request latency
    #[serde(rename = "avg_latency_ms", with = "duration_ms")]
    pub avg_latency: Duration,
    /// Start of the current uptime window
    pub uptime_since: Option<DateTime<Utc>>,
    /// Time of the last recorded request
    pub last_request_at: Option<DateTime<Utc>>,
}

impl Metrics {
    /// Record the outcome of one request
    pub fn record(&mut self, success: bool, latency: Duration) {
        self.request_count = self.request_count.saturating_add(1);
        if success {
            self.success_count = self.success_count.saturating_add(1);
        } else {
            self.error_count = self.error_count.saturating_add(1);
        }

        // avg' = (avg * (n - 1) + x) / n
        let n = self.request_count as f64;
        let avg = self.avg_latency.as_secs_f64();
        let updated = (avg * (n - 1.0) + latency.as_secs_f64()) / n;
        self.avg_latency = Duration::try_from_secs_f64(updated.max(0.0)).unwrap_or(Duration::MAX);
        self.last_request_at = Some(Utc::now());
    }

    /// Percentage of successful requests, 100 when nothing was recorded
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 100.0;
        }
        self.success_count as f64 / self.request_count as f64 * 100.0
    }

    /// Percentage of failed requests, 0 when nothing was recorded
    pub fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.request_count as f64 * 100.0
    }

    /// Time since the unit last started, if it is up
    pub fn uptime(&self) -> Option<Duration> {
        self.uptime_since
            .and_then(|since| (Utc::now() - since).to_std().ok())
    }
}

/// Serialize a [`Duration`] as fractional milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as milliseconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    /// Deserialize from milliseconds, clamping negatives to zero
    ///
    /// Values that do not fit a [`Duration`] are rejected.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(millis.max(0.0) / 1000.0).map_err(serde::de::Error::custom)
    }
}
