//! Durable string-keyed storage backing cache and queue persistence.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum StorageError {
    /// Persistence failed (storage missing, locked, or full). Callers
    /// degrade to memory-only and keep going.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("corrupt value under {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// String-keyed JSON store used for cache and queue persistence under fixed,
/// namespaced keys.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage: tests and persistence-less sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage: one `kv_store` table, lazily initialized.
///
/// Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: Arc<Mutex<Option<SqlitePool>>>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Create a store backed by the given database file (lazy initialization;
    /// the file is created on first use).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            pool: Arc::new(Mutex::new(None)),
            path: path.into(),
        }
    }

    /// Store under the OS app data directory: `{data_dir}/wareflow/client.db`.
    pub fn open_default() -> anyhow::Result<Self> {
        let base = dirs::data_dir()
            .or_else(|| {
                dirs::home_dir().map(|mut h| {
                    h.push(".local");
                    h.push("share");
                    h
                })
            })
            .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

        let mut dir = base;
        dir.push("wareflow");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data directory at {:?}", dir))?;

        dir.push("client.db");
        Ok(Self::new(dir))
    }

    /// Initialize the database connection (called lazily on first use).
    async fn ensure_initialized(&self) -> Result<(), StorageError> {
        let mut pool_guard = self.pool.lock().await;
        if pool_guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StorageError::Unavailable(format!(
                    "failed to create storage directory at {:?}: {err}",
                    parent
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|err| {
            StorageError::Unavailable(format!(
                "failed to open SQLite storage at {:?}: {err}",
                self.path
            ))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|err| StorageError::Unavailable(format!("failed to create kv_store table: {err}")))?;

        *pool_guard = Some(pool);
        Ok(())
    }

    /// Get the pool, initializing if necessary.
    async fn get_pool(&self) -> Result<SqlitePool, StorageError> {
        self.ensure_initialized().await?;
        let pool_guard = self.pool.lock().await;
        pool_guard
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::Unavailable("SQLite pool not initialized".to_string()))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let pool = self.get_pool().await?;

        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .map_err(|err| StorageError::Unavailable(format!("failed to read key {key}: {err}")))?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let pool = self.get_pool().await?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .map_err(|err| StorageError::Unavailable(format!("failed to write key {key}: {err}")))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let pool = self.get_pool().await?;

        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .map_err(|err| StorageError::Unavailable(format!("failed to remove key {key}: {err}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trips() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("a").await.unwrap(), None);

        storage.set("a", "1".to_string()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some("1".to_string()));

        storage.remove("a").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), None);
        // Removing an absent key is a no-op.
        storage.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_storage_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::new(dir.path().join("kv.db"));

        storage.set("cache/products", "[]".to_string()).await.unwrap();
        storage
            .set("cache/products", "[1,2]".to_string())
            .await
            .unwrap();

        assert_eq!(
            storage.get("cache/products").await.unwrap(),
            Some("[1,2]".to_string())
        );
        assert_eq!(storage.get("cache/movements").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_storage_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");

        let storage = SqliteStorage::new(&path);
        storage.set("k", "v".to_string()).await.unwrap();
        drop(storage);

        let reopened = SqliteStorage::new(&path);
        assert_eq!(reopened.get("k").await.unwrap(), Some("v".to_string()));
    }
}
