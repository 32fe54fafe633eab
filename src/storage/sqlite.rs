//! SQLite relational backend.
//!
//! One row per identity. The ordered action list is a JSON array column, using
//! the same serde model as the document backend so both round-trip the same way.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use super::LedgerStore;
use crate::error::{Error, Result};
use crate::model::{Action, IdentityKey, LedgerEntry};

pub const FILE_NAME: &str = "ledger.db";

/// Database handle. Schema is applied before the handle is handed out.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file and run pending migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| Error::storage("connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database (for testing).
    ///
    /// Pinned to one long-lived connection: every new SQLite memory connection
    /// would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| Error::storage("connect", e))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::storage("connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::storage("migrate", e))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage("health_check", e))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn get(&self, key: IdentityKey) -> Result<Option<LedgerEntry>> {
        let row: Option<LedgerRow> = sqlx::query_as(
            "SELECT identity_key, display_name, actions FROM ledger_entries WHERE identity_key = ?1",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::storage("get", e))?;

        row.map(LedgerRow::try_into_entry).transpose()
    }

    async fn list(&self) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT identity_key, display_name, actions FROM ledger_entries
             ORDER BY created_at ASC, identity_key ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage("list", e))?;

        rows.into_iter().map(LedgerRow::try_into_entry).collect()
    }

    async fn upsert(&self, entry: &LedgerEntry) -> Result<()> {
        if entry.is_empty() {
            return self.remove(entry.identity_key).await;
        }

        let actions =
            serde_json::to_string(&entry.actions).map_err(|e| Error::storage("serialize", e))?;
        let now = Utc::now();

        // Single statement: a row is either fully replaced or untouched.
        sqlx::query(
            "INSERT INTO ledger_entries (identity_key, display_name, actions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(identity_key) DO UPDATE SET
                display_name = excluded.display_name,
                actions = excluded.actions,
                updated_at = excluded.updated_at",
        )
        .bind(entry.identity_key.to_string())
        .bind(&entry.display_name)
        .bind(actions)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::storage("upsert", e))?;

        Ok(())
    }

    async fn remove(&self, key: IdentityKey) -> Result<()> {
        sqlx::query("DELETE FROM ledger_entries WHERE identity_key = ?1")
            .bind(key.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::storage("remove", e))?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct LedgerRow {
    identity_key: String,
    display_name: String,
    actions: String,
}

impl LedgerRow {
    fn try_into_entry(self) -> Result<LedgerEntry> {
        let identity_key = self
            .identity_key
            .parse::<IdentityKey>()
            .map_err(|e| Error::MalformedAction {
                identity: self.identity_key.clone(),
                reason: e.to_string(),
            })?;

        let actions: Vec<Action> =
            serde_json::from_str(&self.actions).map_err(|e| Error::MalformedAction {
                identity: self.identity_key.clone(),
                reason: format!("unreadable action list: {e}"),
            })?;

        Ok(LedgerEntry {
            identity_key,
            display_name: self.display_name,
            actions,
        })
    }
}
