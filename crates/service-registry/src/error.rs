//! Error types for the service registry

use thiserror::Error;

/// Service registry error type
#[derive(Error, Debug)]
pub enum Error {
    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No constructor registered for the configured plugin kind
    #[error("Unknown plugin type '{plugin}' for service '{service}'")]
    UnknownPlugin {
        /// Service being constructed
        service: String,
        /// Plugin kind named in the configuration
        plugin: String,
    },

    /// Invalid service configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registering the service would close a dependency cycle
    #[error("Circular dependency detected: {}", path.join(" -> "))]
    CyclicDependency {
        /// The offending cycle, first and last element equal
        path: Vec<String>,
    },

    /// A declared dependency is not registered
    #[error("Service '{service}' depends on unregistered service '{dependency}'")]
    DependencyNotFound {
        /// Service being started
        service: String,
        /// Missing dependency
        dependency: String,
    },

    /// A dependency failed to start
    #[error("Service '{service}' not started: dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        /// Service being started
        service: String,
        /// Dependency that failed
        dependency: String,
        /// Why the dependency failed
        #[source]
        source: Box<Error>,
    },

    /// A dependency started but is not healthy
    #[error("Service '{service}' not started: dependency '{dependency}' is {status}")]
    DependencyUnhealthy {
        /// Service being started
        service: String,
        /// Dependency that is not healthy
        dependency: String,
        /// Status the dependency reported
        status: crate::models::HealthStatus,
    },

    /// A dependent failed to stop, so its dependency was left running
    #[error("Service '{service}' not stopped: dependent '{dependent}' failed to stop: {source}")]
    DependentStopFailed {
        /// Service being stopped
        service: String,
        /// Dependent that failed to stop
        dependent: String,
        /// Why the dependent failed
        #[source]
        source: Box<Error>,
    },

    /// Service is disabled in its configuration
    #[error("Service is disabled: {0}")]
    Disabled(String),

    /// Start, stop, initialize or cleanup failed
    #[error("Lifecycle error for '{service}' during {operation}: {message}")]
    Lifecycle {
        /// Affected service
        service: String,
        /// Operation that failed
        operation: &'static str,
        /// Failure detail
        message: String,
    },

    /// Operation exceeded the configured timeout
    #[error("Operation '{operation}' on '{service}' timed out after {seconds}s")]
    Timeout {
        /// Affected service
        service: String,
        /// Operation that timed out
        operation: &'static str,
        /// Configured timeout
        seconds: u64,
    },

    /// Health probe could not run
    #[error("Health check error: {0}")]
    HealthCheck(String),

    /// Transport error from a plugin's underlying client
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for lifecycle failures
    pub fn lifecycle(
        service: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Error::Lifecycle {
            service: service.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
