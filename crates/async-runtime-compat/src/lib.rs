//! Runtime-agnostic async utilities
//!
//! This crate provides the spawning and cancellation primitives the service
//! lifecycle crates build on, without coupling them to a specific runtime.
//! Background work is spawned through a [`Spawner`]; anything that must be
//! stoppable later is spawned with [`Spawner::spawn_abortable`] and controlled
//! through the returned [`TaskHandle`].
//!
//! # Examples
//!
//! ```no_run
//! use async_runtime_compat::prelude::*;
//!
//! fn example<S: Spawner>(spawner: &S) {
//!     let handle = spawner.spawn_abortable(Box::pin(async {
//!         loop {
//!             sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!     }));
//!
//!     // Later, stop the loop at its next suspension point
//!     handle.abort();
//! }
//! ```

#![warn(missing_docs)]

use futures::future::{AbortHandle, abortable};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable unit of background work
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can spawn futures on an async runtime
pub trait Spawner: Send + Sync {
    /// Spawn a future on the runtime
    ///
    /// The future will run to completion in the background.
    fn spawn(&self, future: BoxTask);

    /// Spawn a future that can be cancelled through the returned handle
    ///
    /// Aborting takes effect at the task's next suspension point; an aborted
    /// task finishes silently.
    fn spawn_abortable(&self, future: BoxTask) -> TaskHandle {
        let (task, abort) = abortable(future);
        self.spawn(Box::pin(async move {
            // Err(Aborted) is the expected way for these tasks to end
            let _ = task.await;
        }));
        TaskHandle { abort }
    }
}

/// Handle to a task spawned with [`Spawner::spawn_abortable`]
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    /// Request cancellation of the task
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Whether [`TaskHandle::abort`] has been called
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Error returned by [`runtime_utils::timeout`] when the deadline passes first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    duration: std::time::Duration,
}

impl Elapsed {
    pub(crate) fn new(duration: std::time::Duration) -> Self {
        Self { duration }
    }

    /// The deadline that was exceeded
    pub fn duration(&self) -> std::time::Duration {
        self.duration
    }
}

impl std::fmt::Display for Elapsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deadline of {:?} elapsed", self.duration)
    }
}

impl std::error::Error for Elapsed {}

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(feature = "smol")]
pub mod smol;

pub mod runtime_utils;

/// Prelude for common imports
pub mod prelude {
    pub use crate::runtime_utils::{sleep, timeout};
    pub use crate::{BoxTask, Elapsed, Spawner, TaskHandle};

    #[cfg(feature = "tokio")]
    pub use crate::tokio::TokioSpawner;

    #[cfg(feature = "smol")]
    pub use crate::smol::SmolSpawner;
}

/// Spawner for the runtime selected by compile-time features
///
/// `smol` wins when both runtime features are enabled, since its executor
/// and timers work from any thread.
pub fn default_spawner() -> Arc<dyn Spawner> {
    #[cfg(feature = "smol")]
    {
        Arc::new(crate::smol::SmolSpawner)
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        Arc::new(crate::tokio::TokioSpawner)
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}
