//! Smol runtime spawner implementation

use crate::{BoxTask, Spawner};

/// Spawner for the Smol runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxTask) {
        smol::spawn(future).detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_utils::sleep;
    use futures::channel::oneshot;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_smol_spawner() {
        let spawner = SmolSpawner;
        let (tx, rx) = oneshot::channel();

        spawner.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[smol_potat::test]
    async fn test_abort_stops_loop() {
        let spawner = SmolSpawner;
        let ticks = Arc::new(AtomicU32::new(0));
        let ticks_clone = ticks.clone();

        let handle = spawner.spawn_abortable(Box::pin(async move {
            loop {
                ticks_clone.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
            }
        }));

        sleep(Duration::from_millis(50)).await;
        handle.abort();
        assert!(handle.is_aborted());

        // Let any in-flight poll settle before sampling
        sleep(Duration::from_millis(20)).await;
        let after_abort = ticks.load(Ordering::SeqCst);
        sleep(Duration::from_millis(50)).await;
        assert!(after_abort > 0);
        assert_eq!(ticks.load(Ordering::SeqCst), after_abort);
    }
}
