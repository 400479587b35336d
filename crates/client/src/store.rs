//! Application state store: the in-memory, observable source of truth.
//!
//! Composes cache, queue, coordinator, and analytics. Every mutating action
//! routes through [`Store::submit`]: a direct backend call while
//! connectivity is known good, an optimistic apply + enqueue otherwise. All
//! read-modify-write of the in-memory collections happens under one lock,
//! so no two mutations interleave; network and storage calls suspend only
//! the action awaiting them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use wareflow_analytics::{AnomalyResult, StockPrediction, project_demand, scan};
use wareflow_core::{ActionId, DomainError, Entity, MovementId, ProductId};
use wareflow_domain::{Movement, Mutation, NewMovement, NewProduct, Product, ProductPatch};

use crate::cache::{Collection, LocalCache};
use crate::config::StoreConfig;
use crate::coordinator::{SyncCoordinator, SyncCycle};
use crate::queue::PendingQueue;
use crate::remote::{RemoteBackend, RemoteError};
use crate::storage::Storage;
use crate::types::{LostAction, PendingAction, StoreStatus, SyncReport, SyncState, Tracked};

/// Store-level failures surfaced to the caller of an action.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backend rejected the mutation outright while online. Queueing it
    /// would only turn it into a lost action later, so the caller hears
    /// about it now.
    #[error("backend rejected: {0}")]
    Rejected(String),
}

struct StoreState {
    products: Vec<Product>,
    movements: Vec<Movement>,
    /// Records awaiting backend confirmation, keyed by entity id. The value
    /// is the most recent queued action touching that record.
    pending_marks: HashMap<Uuid, ActionId>,
    lost: Vec<LostAction>,
    last_error: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
    storage_degraded: bool,
    revision: u64,
}

#[derive(Clone)]
struct AnalyticsMemo {
    revision: u64,
    predictions: Vec<StockPrediction>,
    anomalies: Vec<AnomalyResult>,
}

struct StoreInner {
    backend: Arc<dyn RemoteBackend>,
    cache: LocalCache,
    queue: Arc<PendingQueue>,
    coordinator: SyncCoordinator,
    config: StoreConfig,
    state: Mutex<StoreState>,
    analytics: Mutex<Option<AnalyticsMemo>>,
    status_tx: watch::Sender<StoreStatus>,
}

/// Observable store over the offline state layer. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the store: restore cached snapshots and the pending-action
    /// queue, rebuild pending marks from the queue, and publish the initial
    /// status. Storage problems degrade to a memory-only session; they
    /// never fail the open.
    pub async fn open(
        backend: Arc<dyn RemoteBackend>,
        storage: Arc<dyn Storage>,
        config: StoreConfig,
    ) -> Self {
        let cache = LocalCache::new(storage.clone());
        let queue = Arc::new(PendingQueue::open(storage).await);
        let coordinator = SyncCoordinator::new(backend.clone(), queue.clone())
            .with_max_attempts(config.max_replay_attempts);

        let products: Vec<Product> = match cache.load(Collection::Products).await {
            Ok(Some(products)) => products,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("product snapshot unusable, starting empty: {err}");
                Vec::new()
            }
        };
        let movements: Vec<Movement> = match cache.load(Collection::Movements).await {
            Ok(Some(movements)) => movements,
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("movement snapshot unusable, starting empty: {err}");
                Vec::new()
            }
        };
        let last_synced_at = match cache.last_synced_at().await {
            Ok(at) => at,
            Err(err) => {
                tracing::warn!("last-sync marker unusable: {err}");
                None
            }
        };

        // The cached snapshots already include optimistic applies; the queue
        // tells us which records are still unconfirmed.
        let mut pending_marks = HashMap::new();
        for action in queue.list().await {
            pending_marks.insert(action.mutation.entity_id(), action.id);
        }

        let pending_count = queue.len().await;
        let state = StoreState {
            products,
            movements,
            pending_marks,
            lost: Vec::new(),
            last_error: None,
            last_synced_at,
            storage_degraded: queue.is_degraded(),
            revision: 0,
        };

        let (status_tx, _) = watch::channel(StoreStatus {
            sync_state: SyncState::Offline,
            pending_count,
            lost_count: 0,
            last_error: None,
            last_synced_at: state.last_synced_at,
            storage_degraded: state.storage_degraded,
            revision: 0,
        });

        Self {
            inner: Arc::new(StoreInner {
                backend,
                cache,
                queue,
                coordinator,
                config,
                state: Mutex::new(state),
                analytics: Mutex::new(None),
                status_tx,
            }),
        }
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<StoreStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Latest published status.
    pub fn status(&self) -> StoreStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub async fn products(&self) -> Vec<Tracked<Product>> {
        let st = self.inner.state.lock().await;
        st.products
            .iter()
            .map(|p| tracked(p.clone(), &st.pending_marks))
            .collect()
    }

    pub async fn movements(&self) -> Vec<Tracked<Movement>> {
        let st = self.inner.state.lock().await;
        st.movements
            .iter()
            .map(|m| tracked(m.clone(), &st.pending_marks))
            .collect()
    }

    /// Queued actions, in replay order.
    pub async fn pending_actions(&self) -> Vec<PendingAction> {
        self.inner.queue.list().await
    }

    /// Actions dropped after permanent rejection, oldest first.
    pub async fn lost_actions(&self) -> Vec<LostAction> {
        self.inner.state.lock().await.lost.clone()
    }

    /// Take (and clear) the lost-action reports once the operator has seen
    /// them.
    pub async fn acknowledge_lost(&self) -> Vec<LostAction> {
        let mut st = self.inner.state.lock().await;
        let lost = std::mem::take(&mut st.lost);
        if !lost.is_empty() {
            self.publish(&st).await;
        }
        lost
    }

    /// Create a product. Returns the client-assigned id so the optimistic
    /// record and the eventual confirmed record share their identity.
    pub async fn create_product(&self, draft: NewProduct) -> Result<ProductId, StoreError> {
        let product = Product::new(
            ProductId::new(),
            draft.sku,
            draft.name,
            draft.stock,
            draft.reorder_level,
            Utc::now(),
        )?;
        let id = product.id;
        self.submit(Mutation::CreateProduct { product }).await?;
        Ok(id)
    }

    /// Patch a product. Validated against the local copy first so an
    /// impossible update fails fast instead of becoming a lost action.
    pub async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Err(DomainError::validation("patch changes nothing").into());
        }
        {
            let st = self.inner.state.lock().await;
            let product = st
                .products
                .iter()
                .find(|p| p.id == id)
                .ok_or(DomainError::NotFound)?;
            let mut probe = product.clone();
            probe.apply_patch(&patch, Utc::now())?;
        }
        self.submit(Mutation::UpdateProduct {
            id,
            patch,
            occurred_at: Utc::now(),
        })
        .await
    }

    pub async fn delete_product(&self, id: ProductId) -> Result<(), StoreError> {
        {
            let st = self.inner.state.lock().await;
            if !st.products.iter().any(|p| p.id == id) {
                return Err(DomainError::NotFound.into());
            }
        }
        self.submit(Mutation::DeleteProduct {
            id,
            occurred_at: Utc::now(),
        })
        .await
    }

    pub async fn create_movement(&self, draft: NewMovement) -> Result<MovementId, StoreError> {
        let movement = Movement::new(
            MovementId::new(),
            draft.product_id,
            draft.kind,
            draft.quantity,
            draft.occurred_at,
            Utc::now(),
        )?;
        {
            let st = self.inner.state.lock().await;
            if !st.products.iter().any(|p| p.id == draft.product_id) {
                return Err(DomainError::NotFound.into());
            }
        }
        let id = movement.id;
        self.submit(Mutation::CreateMovement { movement }).await?;
        Ok(id)
    }

    /// Run one sync cycle and merge its outcome into the store.
    pub async fn sync(&self) -> SyncReport {
        let cycle = self.inner.coordinator.run_cycle().await;
        self.apply_cycle(cycle).await
    }

    /// Per-product demand projections over the current state. Recomputed
    /// whenever the revision has moved since the last call.
    pub async fn stock_predictions(&self) -> Vec<StockPrediction> {
        self.refresh_analytics().await.predictions
    }

    /// Anomaly scores for the current movement history. Recomputed whenever
    /// the revision has moved since the last call.
    pub async fn movement_anomalies(&self) -> Vec<AnomalyResult> {
        self.refresh_analytics().await.anomalies
    }

    /// Route a mutation. Online: direct backend call, falling back to the
    /// offline path when the backend cannot be reached, so the intent is
    /// never lost. Offline: optimistic apply + enqueue.
    async fn submit(&self, mutation: Mutation) -> Result<(), StoreError> {
        if self.inner.coordinator.state().await == SyncState::Idle {
            match self.inner.backend.apply(&mutation).await {
                Ok(()) => {
                    self.apply_confirmed(mutation).await;
                    return Ok(());
                }
                Err(err @ RemoteError::Permanent(_)) => {
                    tracing::warn!("backend rejected mutation outright: {err}");
                    return Err(StoreError::Rejected(err.to_string()));
                }
                Err(err) => {
                    tracing::warn!("backend unreachable mid-call, queueing mutation: {err}");
                    self.inner.coordinator.note_offline().await;
                }
            }
        }
        self.apply_optimistic(mutation).await;
        Ok(())
    }

    /// Merge a backend-confirmed mutation into local state.
    async fn apply_confirmed(&self, mutation: Mutation) {
        let mut st = self.inner.state.lock().await;
        if let Err(err) = apply_mutation(&mut st, &mutation) {
            // The backend accepted it; local divergence reconciles on the
            // next fetch.
            tracing::warn!("confirmed mutation no longer applies locally: {err}");
        }
        st.revision += 1;
        self.persist_view(&mut st).await;
        self.publish(&st).await;
    }

    /// Apply a mutation optimistically and queue it for replay. Uses the
    /// same merge semantics as a confirmed write; the record stays marked
    /// unconfirmed until the queue drains.
    async fn apply_optimistic(&self, mutation: Mutation) {
        let mut st = self.inner.state.lock().await;

        let action = PendingAction::new(mutation, self.inner.config.actor.clone());
        let action_id = action.id;
        let mutation = action.mutation.clone();
        let entity = mutation.entity_id();
        self.inner.queue.enqueue(action).await;

        match apply_mutation(&mut st, &mutation) {
            Ok(()) => {
                st.pending_marks.insert(entity, action_id);
            }
            Err(err) => {
                // Leave it queued; the backend has the final say at replay.
                tracing::warn!("optimistic apply failed, action stays queued: {err}");
            }
        }
        st.revision += 1;
        self.persist_view(&mut st).await;
        self.publish(&st).await;
    }

    /// Merge the outcome of a sync cycle: rebase on the fetched snapshot,
    /// keep replayed actions visible, re-apply still-queued ones, record
    /// lost actions and errors.
    async fn apply_cycle(&self, cycle: SyncCycle) -> SyncReport {
        if cycle.superseded {
            return SyncReport {
                state: self.inner.coordinator.state().await,
                fetched: false,
                replayed: Vec::new(),
                lost: Vec::new(),
                error: None,
            };
        }

        let mut st = self.inner.state.lock().await;
        let fetched = cycle.snapshot.is_some();

        if let Some(snapshot) = cycle.snapshot {
            st.products = snapshot.products;
            st.movements = snapshot.movements;
            st.pending_marks.clear();

            // Replayed actions were confirmed after this snapshot was taken;
            // re-apply them so they stay visible until the next fetch.
            for action in &cycle.replayed {
                if let Err(err) = apply_mutation(&mut st, &action.mutation) {
                    tracing::warn!(action = %action.id, "replayed action no longer applies locally: {err}");
                }
            }

            // Still-queued actions stay optimistic and marked unconfirmed.
            for action in self.inner.queue.list().await {
                let entity = action.mutation.entity_id();
                match apply_mutation(&mut st, &action.mutation) {
                    Ok(()) => {
                        st.pending_marks.insert(entity, action.id);
                    }
                    Err(err) => {
                        tracing::warn!(action = %action.id, "queued action does not apply to the fetched snapshot: {err}");
                    }
                }
            }

            st.last_synced_at = Some(snapshot.synced_at);
            if let Err(err) = self.inner.cache.mark_synced(snapshot.synced_at).await {
                tracing::warn!("sync marker not persisted: {err}");
                st.storage_degraded = true;
            }
            self.persist_view(&mut st).await;
        }

        st.last_error = cycle.error.clone();
        if !cycle.lost.is_empty() {
            st.lost.extend(cycle.lost.iter().cloned());
            if st.last_error.is_none() {
                st.last_error = Some(format!(
                    "{} queued action(s) were dropped after backend rejection",
                    cycle.lost.len()
                ));
            }
        }
        st.revision += 1;
        self.publish(&st).await;

        SyncReport {
            state: cycle.state,
            fetched,
            replayed: cycle.replayed.iter().map(|a| a.id).collect(),
            lost: cycle.lost,
            error: cycle.error,
        }
    }

    /// Mirror the current view (optimistic applies included) into the local
    /// cache. Persistence failures degrade to memory-only, never fail the
    /// action.
    async fn persist_view(&self, st: &mut StoreState) {
        if let Err(err) = self.inner.cache.save(Collection::Products, &st.products).await {
            tracing::warn!("product snapshot not persisted, continuing in memory: {err}");
            st.storage_degraded = true;
        }
        if let Err(err) = self
            .inner
            .cache
            .save(Collection::Movements, &st.movements)
            .await
        {
            tracing::warn!("movement snapshot not persisted, continuing in memory: {err}");
            st.storage_degraded = true;
        }
        if self.inner.queue.is_degraded() {
            st.storage_degraded = true;
        }
    }

    async fn publish(&self, st: &StoreState) {
        let status = StoreStatus {
            sync_state: self.inner.coordinator.state().await,
            pending_count: self.inner.queue.len().await,
            lost_count: st.lost.len(),
            last_error: st.last_error.clone(),
            last_synced_at: st.last_synced_at,
            storage_degraded: st.storage_degraded,
            revision: st.revision,
        };
        self.inner.status_tx.send_replace(status);
    }

    async fn refresh_analytics(&self) -> AnalyticsMemo {
        let (revision, products, movements) = {
            let st = self.inner.state.lock().await;
            (st.revision, st.products.clone(), st.movements.clone())
        };

        let mut memo = self.inner.analytics.lock().await;
        match &*memo {
            Some(current) if current.revision == revision => current.clone(),
            _ => {
                let now = Utc::now();
                let predictions = products
                    .iter()
                    .map(|p| project_demand(p.id, &movements, &self.inner.config.demand, now))
                    .collect();
                let anomalies = scan(&movements, &self.inner.config.anomaly);
                let fresh = AnalyticsMemo {
                    revision,
                    predictions,
                    anomalies,
                };
                *memo = Some(fresh.clone());
                fresh
            }
        }
    }
}

fn tracked<T: Entity>(record: T, marks: &HashMap<Uuid, ActionId>) -> Tracked<T>
where
    Uuid: From<T::Id>,
{
    let entity = Uuid::from(record.id());
    match marks.get(&entity) {
        Some(action_id) => Tracked::pending(record, *action_id),
        None => Tracked::confirmed(record),
    }
}

fn apply_mutation(st: &mut StoreState, mutation: &Mutation) -> wareflow_core::DomainResult<()> {
    let StoreState {
        products,
        movements,
        ..
    } = st;
    mutation.apply_to(products, movements)
}
