//! Offline-first pending-action queue with durable persistence.
//!
//! The queue is a dumb, ordered ledger: it validates nothing about payload
//! semantics and guarantees exactly one thing, that `list` returns actions
//! in original enqueue order. That order is the only ordering contract
//! replay relies on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use wareflow_core::ActionId;

use crate::storage::{Storage, StorageError};
use crate::types::PendingAction;

const QUEUE_KEY: &str = "queue/pending";

/// Ordered, durable log of mutations awaiting replay.
///
/// The in-memory list is authoritative for ordering; the storage copy is
/// rewritten after every change. If persistence fails, the queue keeps
/// serving from memory for the rest of the session and flags itself
/// degraded instead of failing the caller.
pub struct PendingQueue {
    storage: Arc<dyn Storage>,
    entries: Mutex<Vec<PendingAction>>,
    degraded: AtomicBool,
}

impl PendingQueue {
    /// Open the queue, restoring any persisted log.
    pub async fn open(storage: Arc<dyn Storage>) -> Self {
        let entries = match storage.get(QUEUE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<PendingAction>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::error!("discarding corrupt pending-action log: {err}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("pending-action log unavailable, starting empty: {err}");
                Vec::new()
            }
        };

        Self {
            storage,
            entries: Mutex::new(entries),
            degraded: AtomicBool::new(false),
        }
    }

    /// Append an action to the tail and persist the log.
    pub async fn enqueue(&self, action: PendingAction) -> ActionId {
        let id = action.id;
        let mut entries = self.entries.lock().await;
        entries.push(action);
        self.persist(&entries).await;
        id
    }

    /// All queued actions, in original enqueue order.
    pub async fn list(&self) -> Vec<PendingAction> {
        self.entries.lock().await.clone()
    }

    /// Remove an action. Removing an absent id is a no-op, not an error.
    pub async fn remove(&self, id: ActionId) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|a| a.id != id);
        if entries.len() != before {
            self.persist(&entries).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// True once a persistence attempt has failed this session.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn persist(&self, entries: &[PendingAction]) {
        let payload = match serde_json::to_string(entries) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!("failed to serialize pending-action log: {err}");
                self.degraded.store(true, Ordering::Relaxed);
                return;
            }
        };

        if let Err(err) = self.storage.set(QUEUE_KEY, payload).await {
            tracing::warn!("pending-action log not persisted; queue is memory-only: {err}");
            self.degraded.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::Utc;
    use wareflow_core::ProductId;
    use wareflow_domain::{Mutation, ProductPatch};

    fn action() -> PendingAction {
        PendingAction::new(
            Mutation::UpdateProduct {
                id: ProductId::new(),
                patch: ProductPatch::stock_delta(1),
                occurred_at: Utc::now(),
            },
            "tester",
        )
    }

    #[tokio::test]
    async fn list_preserves_enqueue_order() {
        let queue = PendingQueue::open(Arc::new(MemoryStorage::new())).await;

        let ids: Vec<ActionId> = vec![
            queue.enqueue(action()).await,
            queue.enqueue(action()).await,
            queue.enqueue(action()).await,
        ];

        let listed: Vec<ActionId> = queue.list().await.iter().map(|a| a.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let queue = PendingQueue::open(Arc::new(MemoryStorage::new())).await;
        let id = queue.enqueue(action()).await;

        queue.remove(id).await;
        assert!(queue.is_empty().await);
        // Second removal of the same id is a no-op.
        queue.remove(id).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn queue_restores_from_storage() {
        let storage = Arc::new(MemoryStorage::new());

        let first = PendingQueue::open(storage.clone()).await;
        let a = first.enqueue(action()).await;
        let b = first.enqueue(action()).await;
        drop(first);

        let reopened = PendingQueue::open(storage).await;
        let listed: Vec<ActionId> = reopened.list().await.iter().map(|x| x.id).collect();
        assert_eq!(listed, vec![a, b]);
    }

    #[tokio::test]
    async fn corrupt_log_starts_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(QUEUE_KEY, "{broken".to_string()).await.unwrap();

        let queue = PendingQueue::open(storage).await;
        assert!(queue.is_empty().await);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 64,
                ..ProptestConfig::default()
            })]

            /// Property: under any interleaving of enqueues and removals,
            /// `list` returns the surviving actions in enqueue order.
            #[test]
            fn order_survives_any_interleaving(
                // true = enqueue, false = remove a pseudo-randomly chosen
                // earlier action (if any).
                ops in proptest::collection::vec(any::<bool>(), 1..40),
                pick in any::<u64>(),
            ) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let queue = PendingQueue::open(Arc::new(MemoryStorage::new())).await;
                    let mut model: Vec<ActionId> = Vec::new();

                    for (i, op) in ops.iter().enumerate() {
                        if *op || model.is_empty() {
                            let id = queue.enqueue(action()).await;
                            model.push(id);
                        } else {
                            let idx = ((pick >> (i % 32)) as usize) % model.len();
                            let id = model.remove(idx);
                            queue.remove(id).await;
                        }

                        let listed: Vec<ActionId> =
                            queue.list().await.iter().map(|a| a.id).collect();
                        prop_assert_eq!(&listed, &model);
                    }
                    Ok(())
                })?;
            }
        }
    }
}
