//! Background worker for periodic synchronization.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::remote::RemoteBackend;
use crate::store::Store;
use crate::types::SyncState;

/// Periodically probes connectivity and runs sync cycles. A reconnect on
/// the connectivity signal triggers an immediate cycle; repeated failures
/// back off by skipping ticks.
pub struct SyncWorker {
    store: Store,
    backend: Arc<dyn RemoteBackend>,
    connectivity: watch::Receiver<bool>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

/// Handle to a running worker.
pub struct SyncWorkerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Wait for the worker task to finish.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

impl SyncWorker {
    /// The connectivity receiver is the reconnect signal; its sender is
    /// expected to outlive the worker.
    pub fn new(
        store: Store,
        backend: Arc<dyn RemoteBackend>,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            interval: Duration::from_secs(30),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background loop.
    pub fn start(self) -> SyncWorkerHandle {
        let SyncWorker {
            store,
            backend,
            mut connectivity,
            interval,
            shutdown,
        } = self;
        let handle_shutdown = shutdown.clone();

        let join = tokio::spawn(async move {
            tracing::info!("background sync worker started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut consecutive_failures: u32 = 0;
            let mut skip_ticks: u32 = 0;

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("sync worker received shutdown signal");
                        break;
                    }
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            tracing::warn!("connectivity signal source dropped; stopping worker");
                            break;
                        }
                        if *connectivity.borrow_and_update() {
                            tracing::info!("connectivity restored, starting sync cycle");
                            run_cycle(&store, &mut consecutive_failures, &mut skip_ticks).await;
                        } else {
                            tracing::info!("connectivity lost");
                        }
                    }
                    _ = ticker.tick() => {
                        if skip_ticks > 0 {
                            skip_ticks -= 1;
                            continue;
                        }
                        if !backend.check_connectivity().await {
                            tracing::debug!("skipping sync, no connectivity");
                            continue;
                        }
                        run_cycle(&store, &mut consecutive_failures, &mut skip_ticks).await;
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        });

        SyncWorkerHandle {
            shutdown: handle_shutdown,
            join,
        }
    }
}

async fn run_cycle(store: &Store, consecutive_failures: &mut u32, skip_ticks: &mut u32) {
    let report = store.sync().await;
    if report.state == SyncState::Idle {
        *consecutive_failures = 0;
        *skip_ticks = 0;
    } else {
        *consecutive_failures += 1;
        // Exponential backoff in tick units, capped.
        *skip_ticks = (1u32 << (*consecutive_failures).min(5)).saturating_sub(1).min(10);
        tracing::warn!(
            failures = *consecutive_failures,
            skip_ticks = *skip_ticks,
            "sync cycle failed, backing off"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::remote::InMemoryBackend;
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use wareflow_core::ProductId;
    use wareflow_domain::Product;

    #[tokio::test]
    async fn reconnect_signal_triggers_a_cycle() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .seed_products(vec![
                Product::new(ProductId::new(), "SKU-W", "Box", 4, 0, Utc::now()).unwrap(),
            ])
            .await;
        backend.set_offline(true);

        let store = Store::open(
            backend.clone(),
            Arc::new(MemoryStorage::new()),
            StoreConfig::default(),
        )
        .await;

        let (tx, rx) = watch::channel(false);
        let handle = SyncWorker::new(store.clone(), backend.clone(), rx)
            .with_interval(Duration::from_secs(3600))
            .start();

        let mut status_rx = store.subscribe();
        assert!(store.products().await.is_empty());

        backend.set_offline(false);
        tx.send(true).unwrap();

        // The reconnect-triggered cycle publishes an Idle status.
        loop {
            status_rx.changed().await.unwrap();
            if status_rx.borrow().sync_state == SyncState::Idle {
                break;
            }
        }
        assert_eq!(store.products().await.len(), 1);

        handle.shutdown();
        handle.join().await;
    }
}
