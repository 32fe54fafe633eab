//! Persistence backends for ledger entries.
//!
//! Both backends implement [`LedgerStore`] with identical observable behavior.
//! The document store keeps everything in one JSON file; the SQLite store keeps
//! one row per identity with the action list serialized as JSON.

pub mod document;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Backend, StorageConfig};
use crate::error::Result;
use crate::model::{Action, IdentityKey, LedgerEntry};

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

/// Durable CRUD over ledger entries.
///
/// Every I/O or serialization fault comes back as [`crate::error::Error::Storage`]
/// naming the failed operation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, key: IdentityKey) -> Result<Option<LedgerEntry>>;

    /// All entries, in an order that is stable for this backend instance.
    async fn list(&self) -> Result<Vec<LedgerEntry>>;

    /// Replace any entry with the same key. An entry without actions is removed.
    async fn upsert(&self, entry: &LedgerEntry) -> Result<()>;

    async fn remove(&self, key: IdentityKey) -> Result<()>;

    /// First action anywhere whose identifier matches, case-insensitively.
    async fn find_action(&self, identifier: &str) -> Result<Option<(LedgerEntry, Action)>> {
        Ok(find_in(self.list().await?, identifier))
    }
}

pub(crate) fn find_in(
    entries: Vec<LedgerEntry>,
    identifier: &str,
) -> Option<(LedgerEntry, Action)> {
    entries.into_iter().find_map(|entry| {
        let action = entry.find(identifier)?.clone();
        Some((entry, action))
    })
}

/// Open the backend named by the configuration.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let store: Arc<dyn LedgerStore> = match config.backend {
        Backend::Document => {
            Arc::new(DocumentStore::open(config.data_dir.join(document::FILE_NAME)).await?)
        }
        Backend::Sqlite => {
            let store = SqliteStore::connect(&config.data_dir.join(sqlite::FILE_NAME)).await?;
            store.health_check().await?;
            Arc::new(store)
        }
    };
    tracing::info!(backend = %config.backend, dir = %config.data_dir.display(), "ledger store opened");
    Ok(store)
}
