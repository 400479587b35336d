//! Sync coordinator: fetch-then-drain cycles with strict replay ordering.
//!
//! One cycle fetches every tracked collection, then drains the pending
//! queue strictly in enqueue order, one in-flight call at a time. A
//! retryable failure stops the drain (never skip ahead: an update must not
//! land before its create); a permanent rejection drops that action,
//! reports it, and keeps draining. Cycles are last-wins: fetch results that
//! arrive after a newer cycle has started are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use wareflow_core::ActionId;
use wareflow_domain::{Movement, Product};

use crate::queue::PendingQueue;
use crate::remote::{RemoteBackend, RemoteError};
use crate::types::{LostAction, PendingAction, SyncState};

/// Server snapshot fetched by one cycle.
#[derive(Debug, Clone)]
pub struct FetchedSnapshot {
    pub products: Vec<Product>,
    pub movements: Vec<Movement>,
    pub synced_at: DateTime<Utc>,
}

/// Raw outcome of one cycle, before the store merges it.
#[derive(Debug)]
pub struct SyncCycle {
    pub state: SyncState,
    /// `None` when the fetch failed or the cycle was superseded.
    pub snapshot: Option<FetchedSnapshot>,
    /// Actions confirmed by the backend during this cycle, in replay order.
    pub replayed: Vec<PendingAction>,
    /// Actions dropped and reported during this cycle.
    pub lost: Vec<LostAction>,
    pub error: Option<String>,
    /// A newer cycle started while this one was in flight; everything here
    /// was discarded.
    pub superseded: bool,
}

pub struct SyncCoordinator {
    backend: Arc<dyn RemoteBackend>,
    queue: Arc<PendingQueue>,
    state: Mutex<SyncState>,
    generation: AtomicU64,
    /// Replay is single-flight even when cycles overlap.
    drain_lock: Mutex<()>,
    /// Coordinator-side retry bookkeeping; the queued action itself stays
    /// immutable.
    attempts: Mutex<HashMap<ActionId, u32>>,
    max_attempts: u32,
}

impl SyncCoordinator {
    pub fn new(backend: Arc<dyn RemoteBackend>, queue: Arc<PendingQueue>) -> Self {
        Self {
            backend,
            queue,
            state: Mutex::new(SyncState::Offline),
            generation: AtomicU64::new(0),
            drain_lock: Mutex::new(()),
            attempts: Mutex::new(HashMap::new()),
            max_attempts: 5,
        }
    }

    /// Retry budget for transient replay failures before an action is
    /// surfaced as lost.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn state(&self) -> SyncState {
        *self.state.lock().await
    }

    /// Record that a direct backend call failed; mutations route through the
    /// queue until the next successful cycle.
    pub async fn note_offline(&self) {
        self.set_state(SyncState::Offline).await;
    }

    async fn set_state(&self, state: SyncState) {
        *self.state.lock().await = state;
    }

    /// Run one cycle: fetch all tracked collections, then drain the queue.
    pub async fn run_cycle(&self) -> SyncCycle {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(SyncState::Syncing).await;
        tracing::debug!(generation, "sync cycle started");

        let (products, movements) = tokio::join!(
            self.backend.fetch_products(),
            self.backend.fetch_movements()
        );

        if self.is_superseded(generation) {
            tracing::debug!(generation, "cycle superseded during fetch; discarding results");
            return self.superseded_cycle().await;
        }

        let (products, movements) = match (products, movements) {
            (Ok(products), Ok(movements)) => (products, movements),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!("collection fetch failed, keeping cached state: {err}");
                self.set_state(SyncState::Offline).await;
                return SyncCycle {
                    state: SyncState::Offline,
                    snapshot: None,
                    replayed: Vec::new(),
                    lost: Vec::new(),
                    error: Some(err.to_string()),
                    superseded: false,
                };
            }
        };

        let snapshot = FetchedSnapshot {
            products,
            movements,
            synced_at: Utc::now(),
        };

        let _drain_guard = self.drain_lock.lock().await;
        if self.is_superseded(generation) {
            return self.superseded_cycle().await;
        }

        let (replayed, lost, abort) = self.drain(generation).await;

        let (state, error) = match abort {
            Some(err) => (SyncState::Offline, Some(err.to_string())),
            None => (SyncState::Idle, None),
        };
        self.set_state(state).await;
        tracing::info!(
            generation,
            replayed = replayed.len(),
            lost = lost.len(),
            ?state,
            "sync cycle finished"
        );

        SyncCycle {
            state,
            snapshot: Some(snapshot),
            replayed,
            lost,
            error,
            superseded: false,
        }
    }

    /// Replay queued actions strictly in order. Returns the confirmed
    /// actions, the dropped ones, and the retryable error that stopped the
    /// drain, if any.
    async fn drain(
        &self,
        generation: u64,
    ) -> (Vec<PendingAction>, Vec<LostAction>, Option<RemoteError>) {
        let mut replayed = Vec::new();
        let mut lost = Vec::new();

        for action in self.queue.list().await {
            if self.is_superseded(generation) {
                // Stop early; the newer cycle will drain the remainder.
                return (replayed, lost, None);
            }

            match self.backend.apply(&action.mutation).await {
                Ok(()) => {
                    self.queue.remove(action.id).await;
                    self.clear_attempts(action.id).await;
                    tracing::info!(action = %action.id, kind = %action.kind(), "queued action replayed");
                    replayed.push(action);
                }
                Err(err @ RemoteError::Permanent(_)) => {
                    self.queue.remove(action.id).await;
                    self.clear_attempts(action.id).await;
                    tracing::error!(action = %action.id, "queued action permanently rejected: {err}");
                    lost.push(LostAction {
                        action_id: action.id,
                        kind: action.kind(),
                        reason: err.to_string(),
                    });
                    // A dead action must not block the rest of the queue.
                }
                Err(err @ RemoteError::Unreachable(_)) => {
                    // Connectivity loss carries no retry penalty; the queue
                    // is preserved as-is for the next cycle.
                    tracing::warn!(action = %action.id, "drain stopped, backend unreachable: {err}");
                    return (replayed, lost, Some(err));
                }
                Err(err @ RemoteError::Transient(_)) => {
                    let attempts = self.bump_attempts(action.id).await;
                    if attempts >= self.max_attempts {
                        self.queue.remove(action.id).await;
                        self.clear_attempts(action.id).await;
                        tracing::error!(
                            action = %action.id,
                            attempts,
                            "giving up on queued action after repeated transient rejections"
                        );
                        lost.push(LostAction {
                            action_id: action.id,
                            kind: action.kind(),
                            reason: format!("gave up after {attempts} attempts: {err}"),
                        });
                        continue;
                    }
                    tracing::warn!(
                        action = %action.id,
                        attempts,
                        "drain stopped on transient rejection, will retry next cycle: {err}"
                    );
                    return (replayed, lost, Some(err));
                }
            }
        }

        (replayed, lost, None)
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    async fn superseded_cycle(&self) -> SyncCycle {
        SyncCycle {
            state: self.state().await,
            snapshot: None,
            replayed: Vec::new(),
            lost: Vec::new(),
            error: None,
            superseded: true,
        }
    }

    async fn bump_attempts(&self, id: ActionId) -> u32 {
        let mut attempts = self.attempts.lock().await;
        let entry = attempts.entry(id).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn clear_attempts(&self, id: ActionId) {
        self.attempts.lock().await.remove(&id);
    }
}
