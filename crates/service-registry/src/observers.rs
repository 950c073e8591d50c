//! Lifecycle observers
//!
//! Each event kind has its own typed list. Observers run synchronously in
//! registration order; a failing or panicking observer is logged and skipped
//! so it never affects the remaining observers or the operation that fired
//! the event.

use crate::{Error, models::HealthState};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, warn};

/// Error type observers may return
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by every observer
pub type ObserverResult = std::result::Result<(), ObserverError>;

/// Observer for start and stop events, receives the service id
pub type LifecycleObserver = dyn Fn(&str) -> ObserverResult + Send + Sync;

/// Observer for health transitions, receives the service id, old and new state
pub type HealthChangeObserver =
    dyn Fn(&str, &HealthState, &HealthState) -> ObserverResult + Send + Sync;

/// Observer for lifecycle and probe errors
pub type ErrorObserver = dyn Fn(&str, &Error) -> ObserverResult + Send + Sync;

/// Ordered list of observers for one event kind
pub struct ObserverList<F: ?Sized> {
    event: &'static str,
    observers: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> ObserverList<F> {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Append an observer
    pub fn register(&self, observer: Arc<F>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer, returning how many failed
    ///
    /// The list is snapshotted first so observers may register further
    /// observers without deadlocking.
    pub fn notify(&self, service_id: &str, call: impl Fn(&F) -> ObserverResult) -> usize {
        let snapshot: Vec<Arc<F>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (index, observer) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        "{} observer #{} for service '{}' failed: {}",
                        self.event, index, service_id, e
                    );
                }
                Err(panic) => {
                    failures += 1;
                    error!(
                        "{} observer #{} for service '{}' panicked: {}",
                        self.event,
                        index,
                        service_id,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        failures
    }
}

/// Observer lists for every lifecycle event of a unit
pub struct Observers {
    /// Fired after a successful start
    pub on_start: ObserverList<LifecycleObserver>,
    /// Fired after a successful stop
    pub on_stop: ObserverList<LifecycleObserver>,
    /// Fired when the health status actually changes
    pub on_health_change: ObserverList<HealthChangeObserver>,
    /// Fired on lifecycle failures
    pub on_error: ObserverList<ErrorObserver>,
}

impl Default for Observers {
    fn default() -> Self {
        Self {
            on_start: ObserverList::new("on_start"),
            on_stop: ObserverList::new("on_stop"),
            on_health_change: ObserverList::new("on_health_change"),
            on_error: ObserverList::new("on_error"),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
