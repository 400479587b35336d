//! `wareflow-client`
//!
//! **Responsibility:** the offline-capable state layer of the dashboard.
//!
//! This crate provides:
//! - Durable string-keyed storage ([`storage`]) for cache and queue
//!   persistence
//! - Local snapshot caching ([`cache`]) of the last known-good entity
//!   collections
//! - An ordered, durable pending-action queue ([`queue`]) for mutations
//!   captured while offline
//! - The sync coordinator ([`coordinator`]): fetch-then-drain cycles with
//!   strict replay ordering
//! - The observable application state store ([`store`]) composing all of
//!   the above with the analytics engine
//! - A background sync worker ([`worker`])
//!
//! The rendering layer is a consumer only: it subscribes to store status,
//! invokes store actions, and never touches cache, queue, or backend
//! directly.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod store;
pub mod types;
pub mod worker;

pub use cache::{Collection, LocalCache};
pub use config::StoreConfig;
pub use coordinator::{FetchedSnapshot, SyncCoordinator, SyncCycle};
pub use queue::PendingQueue;
pub use remote::{HttpBackend, InMemoryBackend, RemoteBackend, RemoteError};
pub use storage::{MemoryStorage, SqliteStorage, Storage, StorageError};
pub use store::{Store, StoreError};
pub use types::{
    LostAction, PendingAction, Provenance, StoreStatus, SyncReport, SyncState, Tracked,
};
pub use worker::{SyncWorker, SyncWorkerHandle};
