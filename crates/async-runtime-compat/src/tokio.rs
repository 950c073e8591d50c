//! Tokio runtime spawner implementation

use crate::{BoxTask, Spawner};

/// Spawner for the Tokio runtime
///
/// Must be used from within a Tokio runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxTask) {
        tokio::spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_spawner() {
        let spawner = TokioSpawner;
        let (tx, rx) = tokio::sync::oneshot::channel();

        spawner.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_tokio_abortable() {
        let spawner = TokioSpawner;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = spawner.spawn_abortable(Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            let _ = tx.send(());
        }));
        handle.abort();

        // The sender is dropped without sending once the task is aborted
        assert!(rx.await.is_err());
    }
}
