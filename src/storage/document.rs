//! Flat JSON document backend.
//!
//! The whole ledger lives in one file, held in memory and rewritten atomically
//! on every mutation: serialize to a sibling temp file, fsync, rename over the
//! original.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{LedgerStore, find_in};
use crate::error::{Error, Result};
use crate::model::{Action, IdentityKey, LedgerEntry};

pub const FILE_NAME: &str = "ledger.json";

/// On-disk shape. Entries are kept as raw JSON until validated so that a bad
/// entry can be reported with its identity.
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default, alias = "users")]
    entries: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    entries: &'a [LedgerEntry],
}

pub struct DocumentStore {
    path: PathBuf,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl DocumentStore {
    /// Load the document at `path`, creating an empty one if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => parse_document(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_atomic(&path, &[]).await?;
                Vec::new()
            }
            Err(e) => return Err(Error::storage("open", e)),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "document ledger loaded");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_document(bytes: &[u8]) -> Result<Vec<LedgerEntry>> {
    let raw: RawDocument = serde_json::from_slice(bytes).map_err(|e| Error::storage("open", e))?;

    raw.entries
        .into_iter()
        .filter_map(|value| {
            let identity = value
                .get("identity_key")
                .or_else(|| value.get("uuid"))
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| "<missing>".to_string());

            match serde_json::from_value::<LedgerEntry>(value) {
                // Empty entries must not persist; drop any left by older writers.
                Ok(entry) if entry.is_empty() => None,
                Ok(entry) => Some(Ok(entry)),
                Err(e) => Some(Err(Error::MalformedAction {
                    identity,
                    reason: e.to_string(),
                })),
            }
        })
        .collect()
}

async fn write_atomic(path: &Path, entries: &[LedgerEntry]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(&DocumentRef { entries })
        .map_err(|e| Error::storage("serialize", e))?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    };
    write.await.map_err(|e| Error::storage("write", e))
}

#[async_trait]
impl LedgerStore for DocumentStore {
    async fn get(&self, key: IdentityKey) -> Result<Option<LedgerEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().find(|e| e.identity_key == key).cloned())
    }

    async fn list(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn upsert(&self, entry: &LedgerEntry) -> Result<()> {
        if entry.is_empty() {
            return self.remove(entry.identity_key).await;
        }

        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        match next.iter_mut().find(|e| e.identity_key == entry.identity_key) {
            Some(existing) => *existing = entry.clone(),
            None => next.push(entry.clone()),
        }

        // Memory only changes once the file is safely on disk.
        write_atomic(&self.path, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: IdentityKey) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if !entries.iter().any(|e| e.identity_key == key) {
            return Ok(());
        }

        let next: Vec<LedgerEntry> = entries
            .iter()
            .filter(|e| e.identity_key != key)
            .cloned()
            .collect();
        write_atomic(&self.path, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn find_action(&self, identifier: &str) -> Result<Option<(LedgerEntry, Action)>> {
        let entries = self.entries.lock().await;
        Ok(find_in(entries.clone(), identifier))
    }
}
