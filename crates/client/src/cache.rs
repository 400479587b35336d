//! Local snapshot cache for offline support.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::storage::{Storage, StorageError};

/// Entity collections tracked by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Products,
    Movements,
}

impl Collection {
    /// Fixed, namespaced storage key for this collection's snapshot.
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Products => "cache/products",
            Collection::Movements => "cache/movements",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Products => "products",
            Collection::Movements => "movements",
        }
    }
}

const LAST_SYNCED_KEY: &str = "meta/last_synced_at";

/// Last known-good copy of each entity collection, plus sync bookkeeping.
///
/// A snapshot is written wholesale under a single key, so a `save` either
/// fully replaces the prior snapshot or fails without partial mutation.
/// Collections are independent: there is no cross-collection transaction.
#[derive(Clone)]
pub struct LocalCache {
    storage: Arc<dyn Storage>,
}

impl LocalCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Replace the snapshot for one collection.
    pub async fn save<T: Serialize>(
        &self,
        collection: Collection,
        entities: &[T],
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(entities).map_err(|err| StorageError::Unavailable(
            format!("failed to serialize {} snapshot: {err}", collection.name()),
        ))?;
        self.storage.set(collection.key(), payload).await
    }

    /// Load the snapshot for one collection; `None` when never synced.
    pub async fn load<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Option<Vec<T>>, StorageError> {
        match self.storage.get(collection.key()).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|err| {
                StorageError::Corrupt {
                    key: collection.key().to_string(),
                    message: err.to_string(),
                }
            }),
        }
    }

    /// Record a successful sync point.
    pub async fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.storage.set(LAST_SYNCED_KEY, at.to_rfc3339()).await
    }

    /// When the last successful sync happened; `None` when never synced.
    pub async fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        match self.storage.get(LAST_SYNCED_KEY).await? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|err| StorageError::Corrupt {
                    key: LAST_SYNCED_KEY.to_string(),
                    message: err.to_string(),
                }),
        }
    }

    /// Drop every snapshot and the sync marker.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(Collection::Products.key()).await?;
        self.storage.remove(Collection::Movements.key()).await?;
        self.storage.remove(LAST_SYNCED_KEY).await
    }
}
