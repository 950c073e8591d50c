//! HTTP-backed reference plugin
//!
//! The adapter owns no I/O of its own. An [`HttpConnector`] opens a pooled
//! [`HttpTransport`] when the unit starts; the transport is dropped again on
//! stop. Probe outcomes map to health as follows:
//!
//! | outcome              | status      |
//! |----------------------|-------------|
//! | 2xx                  | `Healthy`   |
//! | 502, 503, 504        | `Degraded`  |
//! | any other status     | `Unhealthy` |
//! | timeout              | `Unhealthy` |
//! | connection failure   | `Error`     |

use crate::{
    Error, Result,
    models::{HealthState, HealthStatus, ServiceConfig},
    plugin::{PluginCore, ServicePlugin},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Timeout used for probes when the unit's own timeout is disabled
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single HTTP request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the deadline
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or was reset
    #[error("connection failed: {0}")]
    Connection(String),
}

/// A connected, pooled HTTP client
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET and return the response status code
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<u16, TransportError>;
}

/// Opens transports for HTTP-backed units
#[async_trait]
pub trait HttpConnector: Send + Sync {
    /// Open a transport configured from the unit's settings
    async fn connect(&self, config: &ServiceConfig) -> Result<Arc<dyn HttpTransport>>;
}

/// Health status for an HTTP status code
pub fn status_for_code(code: u16) -> HealthStatus {
    match code {
        200..=299 => HealthStatus::Healthy,
        502..=504 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

/// Unit that probes a health URL over HTTP
pub struct HttpServicePlugin {
    core: PluginCore,
    connector: Arc<dyn HttpConnector>,
    transport: Mutex<Option<Arc<dyn HttpTransport>>>,
}

impl HttpServicePlugin {
    /// Create the plugin, rejecting configs without a health URL
    pub fn new(config: ServiceConfig, connector: Arc<dyn HttpConnector>) -> Result<Self> {
        if config.health_url().is_none() {
            return Err(Error::Config(format!(
                "service '{}' needs health_check_url or settings.health_url",
                config.id
            )));
        }

        Ok(Self {
            core: PluginCore::new(config),
            connector,
            transport: Mutex::new(None),
        })
    }

    /// Whether a transport is currently open
    pub fn is_connected(&self) -> bool {
        self.current_transport().is_some()
    }

    fn current_transport(&self) -> Option<Arc<dyn HttpTransport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_transport(&self, transport: Option<Arc<dyn HttpTransport>>) {
        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = transport;
    }

    async fn probe(&self, transport: &dyn HttpTransport) -> Result<HealthState> {
        let config = self.core.config();
        let url = config
            .health_url()
            .ok_or_else(|| Error::HealthCheck(format!("no health URL for '{}'", config.id)))?;
        let timeout = config.timeout().unwrap_or(DEFAULT_PROBE_TIMEOUT);

        let started = Instant::now();
        let outcome = transport.get(&url, timeout).await;
        let latency = started.elapsed();

        let state = match outcome {
            Ok(code) => {
                let status = status_for_code(code);
                let state = HealthState::new(status)
                    .with_detail("status_code", serde_json::json!(code));
                if status == HealthStatus::Healthy {
                    state
                } else {
                    state.with_error(format!("{} returned HTTP {}", url, code))
                }
            }
            Err(TransportError::Timeout) => {
                HealthState::unhealthy(format!("{} timed out after {:?}", url, timeout))
            }
            Err(TransportError::Connection(msg)) => HealthState::error(msg),
        };

        debug!("Probe of {} for {}: {}", url, config.id, state.status);
        Ok(state.with_latency(latency))
    }
}

#[async_trait]
impl ServicePlugin for HttpServicePlugin {
    fn core(&self) -> &PluginCore {
        &self.core
    }

    async fn start(&self) -> Result<()> {
        let config = self.core.config();
        info!("Connecting HTTP service {}", config.id);

        let transport = self.connector.connect(&config).await?;
        let state = self.probe(transport.as_ref()).await?;
        let status = state.status;
        let message = state.error_message.clone();
        self.core.update_health(state);

        if !status.is_usable() {
            // Pool is dropped with `transport`
            warn!("HTTP service {} failed its first probe: {}", config.id, status);
            return Err(Error::lifecycle(
                config.id.clone(),
                "start",
                message.unwrap_or_else(|| format!("initial probe reported {}", status)),
            ));
        }

        self.set_transport(Some(transport));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.set_transport(None);
        debug!("Closed HTTP pool for {}", self.core.id());
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthState> {
        match self.current_transport() {
            Some(transport) => self.probe(transport.as_ref()).await,
            None => Ok(HealthState::unhealthy("not connected")),
        }
    }
}
