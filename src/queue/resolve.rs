//! Identity resolution: durable key or display name, online or offline.

use crate::error::Result;
use crate::host::PresenceSource;
use crate::model::{Identity, IdentityKey};
use crate::storage::LedgerStore;

/// How a caller names an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRef {
    Key(IdentityKey),
    Name(String),
}

impl IdentityRef {
    /// Anything that parses as a UUID is a key; everything else is a name.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<IdentityKey>() {
            Ok(key) => IdentityRef::Key(key),
            Err(_) => IdentityRef::Name(raw.trim().to_string()),
        }
    }
}

impl From<&str> for IdentityRef {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<IdentityKey> for IdentityRef {
    fn from(key: IdentityKey) -> Self {
        IdentityRef::Key(key)
    }
}

impl std::fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityRef::Key(key) => write!(f, "{key}"),
            IdentityRef::Name(name) => f.write_str(name),
        }
    }
}

/// Resolve a reference to an identity.
///
/// A connected identity always wins over cached or offline data. With
/// `fallback` set, unknown references still resolve: names through the
/// presence source's best-effort lookup or a name-derived key. Fallback
/// results are never marked present.
pub(crate) async fn resolve(
    presence: &dyn PresenceSource,
    store: &dyn LedgerStore,
    reference: &IdentityRef,
    fallback: bool,
) -> Result<Option<Identity>> {
    match reference {
        IdentityRef::Key(key) => resolve_key(presence, store, *key, fallback).await,
        IdentityRef::Name(name) => resolve_name(presence, store, name, fallback).await,
    }
}

async fn resolve_key(
    presence: &dyn PresenceSource,
    store: &dyn LedgerStore,
    key: IdentityKey,
    fallback: bool,
) -> Result<Option<Identity>> {
    if let Some(online) = presence.online_by_key(key) {
        return Ok(Some(online));
    }
    if let Some(name) = presence.known_by_key(key) {
        return Ok(Some(Identity::offline(key, name)));
    }
    if let Some(entry) = store.get(key).await? {
        return Ok(Some(Identity::offline(key, entry.display_name)));
    }
    Ok(fallback.then(|| Identity::offline(key, key.to_string())))
}

async fn resolve_name(
    presence: &dyn PresenceSource,
    store: &dyn LedgerStore,
    name: &str,
    fallback: bool,
) -> Result<Option<Identity>> {
    if let Some(online) = presence.online_by_name(name) {
        return Ok(Some(online));
    }
    if let Some(key) = presence.known_by_name(name) {
        let display_name = presence
            .known_by_key(key)
            .unwrap_or_else(|| name.to_string());
        return Ok(Some(Identity::offline(key, display_name)));
    }

    let cached = store
        .list()
        .await?
        .into_iter()
        .find(|entry| entry.display_name.eq_ignore_ascii_case(name));
    if let Some(entry) = cached {
        return Ok(Some(Identity::offline(entry.identity_key, entry.display_name)));
    }

    if !fallback {
        return Ok(None);
    }
    let key = presence
        .best_effort_lookup(name)
        .unwrap_or_else(|| IdentityKey::from_name(name));
    tracing::debug!(name, identity = %key, "identity synthesized by fallback lookup");
    Ok(Some(Identity::offline(key, name)))
}
