//! Periodic reaper for stale in-memory trace logs and durable-store rows.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::durable::DurableStore;
use crate::log::TraceRegistry;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Handle to a spawned [`TtlSweeper`] task. Dropping this does not stop the
/// task; call [`SweeperHandle::abort`] to stop it.
pub struct SweeperHandle {
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn abort(&self) {
        self.join.abort();
    }
}

pub struct TtlSweeper;

impl TtlSweeper {
    /// Spawn a background task that, every `interval`, drops in-memory
    /// trace logs older than `ttl` and asks `store` to delete rows older
    /// than the same cutoff.
    pub fn spawn(
        registry: Arc<TraceRegistry>,
        store: Arc<dyn DurableStore>,
        interval: Duration,
        ttl: Duration,
    ) -> SweeperHandle {
        let join = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                registry.sweep_older_than(ttl);
                let cutoff = chrono::Utc::now()
                    - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                if let Err(err) = store.delete_before(cutoff).await {
                    tracing::warn!(error = %err, "ttl sweeper failed to prune durable store");
                }
            }
        });
        SweeperHandle { join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::JsonlDurableStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sweeper_runs_and_can_be_aborted() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(TraceRegistry::new());
        let store: Arc<dyn DurableStore> =
            Arc::new(JsonlDurableStore::open(dir.path().join("t.jsonl")).unwrap());

        let handle = TtlSweeper::spawn(
            registry,
            store,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();
    }
}
