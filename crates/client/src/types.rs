//! Shared types of the offline state layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::ActionId;
use wareflow_domain::{Mutation, MutationKind};

/// Connectivity/sync state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Backend unreachable or the last cycle failed; mutations queue locally.
    Offline,
    /// A sync cycle is in flight.
    Syncing,
    /// Last cycle completed; backend considered reachable.
    Idle,
}

/// A mutation captured while the backend was unreachable.
///
/// Immutable once enqueued: it is either confirmed (removed from the queue)
/// or permanently failed (removed and surfaced as a [`LostAction`]), never
/// silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub mutation: Mutation,
    pub enqueued_at: DateTime<Utc>,
    /// Who captured the intent (operator or device name).
    pub actor: String,
}

impl PendingAction {
    /// Build an action with a fresh time-ordered identifier.
    pub fn new(mutation: Mutation, actor: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            mutation,
            enqueued_at: Utc::now(),
            actor: actor.into(),
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }
}

/// Whether a record's latest local write has been confirmed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Matches the backend's canonical copy (as of the last fetch).
    Confirmed,
    /// Applied optimistically; settles when the named action drains.
    Pending(ActionId),
}

/// A record plus its confirmation provenance, as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<T> {
    pub record: T,
    pub provenance: Provenance,
}

impl<T> Tracked<T> {
    pub fn confirmed(record: T) -> Self {
        Self {
            record,
            provenance: Provenance::Confirmed,
        }
    }

    pub fn pending(record: T, action_id: ActionId) -> Self {
        Self {
            record,
            provenance: Provenance::Pending(action_id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.provenance, Provenance::Pending(_))
    }
}

/// A queued action dropped after a permanent rejection or an exhausted retry
/// budget. Always surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LostAction {
    pub action_id: ActionId,
    pub kind: MutationKind,
    pub reason: String,
}

/// Summary of one sync cycle as merged into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub state: SyncState,
    /// Whether a fresh server snapshot was applied.
    pub fetched: bool,
    /// Queued actions confirmed by the backend, in replay order.
    pub replayed: Vec<ActionId>,
    /// Queued actions dropped and reported during this cycle.
    pub lost: Vec<LostAction>,
    pub error: Option<String>,
}

/// Observable store status, published on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub sync_state: SyncState,
    pub pending_count: usize,
    pub lost_count: usize,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// True once cache/queue persistence has failed; the session continues
    /// memory-only.
    pub storage_degraded: bool,
    /// Bumped on every applied change; analytics consumers recompute when it
    /// moves.
    pub revision: u64,
}
