//! `reqwest` transport for the HTTP plugin
//!
//! reqwest needs a tokio reactor, while units may be polled from any
//! executor. Requests are therefore spawned onto a captured tokio runtime
//! handle and their join handles awaited from the caller's executor.

use crate::{
    Error, Result,
    http::{HttpConnector, HttpTransport, TransportError},
    models::ServiceConfig,
};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// Idle connections kept per host when `pool_max_idle_per_host` is unset
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Connector that builds one pooled `reqwest::Client` per unit start
#[derive(Clone)]
pub struct ReqwestConnector {
    handle: Handle,
}

impl ReqwestConnector {
    /// Run requests on the given tokio runtime
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the tokio runtime of the calling context
    pub fn from_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Transport(format!("no tokio runtime available: {}", e)))
    }
}

#[async_trait]
impl HttpConnector for ReqwestConnector {
    async fn connect(&self, config: &ServiceConfig) -> Result<Arc<dyn HttpTransport>> {
        let pool_size = config
            .settings
            .get("pool_max_idle_per_host")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_POOL_SIZE);

        let client = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build client for '{}': {}", config.id, e)))?;

        debug!("Opened HTTP pool for {} ({} idle per host)", config.id, pool_size);
        Ok(Arc::new(ReqwestTransport {
            client,
            handle: self.handle.clone(),
        }))
    }
}

struct ReqwestTransport {
    client: Client,
    handle: Handle,
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> std::result::Result<u16, TransportError> {
        let client = self.client.clone();
        let url = url.to_string();
        let request = self.handle.spawn(async move {
            client
                .get(&url)
                .timeout(timeout)
                .send()
                .await
                .map(|response| response.status().as_u16())
        });

        match request.await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(e)) if e.is_timeout() => Err(TransportError::Timeout),
            Ok(Err(e)) => Err(TransportError::Connection(e.to_string())),
            Err(e) => Err(TransportError::Connection(format!("request task failed: {}", e))),
        }
    }
}
