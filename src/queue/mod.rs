//! Queue manager: add, remove, list and look up deferred actions.
//!
//! Identity-scoped writes run under the identity's lock, shared with the
//! delivery engine built from the same manager.

pub mod locks;
pub mod page;
pub mod resolve;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::delivery::execute::{Execution, execute};
use crate::delivery::DeliveryEngine;
use crate::error::Result;
use crate::host::Host;
use crate::model::{Action, ActionId, Identity, IdentityKey, LedgerEntry, NewAction};
use crate::storage::LedgerStore;

use locks::IdentityLocks;
pub use page::Pagination;
pub use resolve::IdentityRef;
use resolve::resolve;

/// Who is asking to queue an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    System,
    Identity(IdentityKey),
}

/// Result of [`QueueManager::add_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Stored until the identity next connects.
    Queued {
        identity: Identity,
        identifier: ActionId,
    },
    /// Ran right away because the identity was online. `retained` is set for
    /// recurring actions, which are also stored for later connections.
    DeliveredImmediately {
        identity: Identity,
        identifier: ActionId,
        retained: bool,
    },
    /// The caller may not queue actions.
    Denied,
    /// The reference matched no identity and fallback lookup is off.
    IdentityNotFound { reference: String },
}

/// What a remove request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveTarget {
    All,
    One(String),
}

impl RemoveTarget {
    /// `*` means every action.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "*" => RemoveTarget::All,
            other => RemoveTarget::One(other.to_string()),
        }
    }
}

/// Which part of a remove request matched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    /// No ledger entry for the identity.
    Identity,
    /// The entry exists but no action matched.
    Action,
}

/// Result of [`QueueManager::remove_action`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed {
        identity: Identity,
        removed: Vec<ActionId>,
        remaining: usize,
    },
    NotFound(Missing),
}

/// One page of ledger entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
    pub total_entries: usize,
    pub total_pages: usize,
    pub next_page: Option<usize>,
    pub entries: Vec<LedgerEntry>,
}

/// Result of [`QueueManager::list_actions`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListOutcome {
    Page(Page),
    /// Requested page outside `1..=total_pages`.
    InvalidPage { requested: usize, total_pages: usize },
    /// Nothing is queued for anyone.
    Empty,
}

/// The queue's public API. Cheap to clone.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn LedgerStore>,
    host: Host,
    settings: Settings,
    locks: Arc<IdentityLocks>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn LedgerStore>, host: Host, settings: Settings) -> Self {
        Self {
            store,
            host,
            settings,
            locks: Arc::new(IdentityLocks::default()),
        }
    }

    /// A delivery engine sharing this manager's store and identity locks.
    pub fn delivery_engine(&self) -> DeliveryEngine {
        DeliveryEngine::new(
            Arc::clone(&self.store),
            self.host.clone(),
            self.settings.clone(),
            Arc::clone(&self.locks),
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Gate applied to every add request.
    pub fn may_add(&self, caller: &Caller) -> bool {
        match caller {
            Caller::System => true,
            Caller::Identity(key) => {
                !self.settings.system_only_add
                    && self.host.permits(*key, &self.settings.add_permission)
            }
        }
    }

    /// Queue an action for an identity, or run it now if they are online and
    /// deliver-if-present is enabled.
    pub async fn add_action(
        &self,
        reference: &IdentityRef,
        draft: NewAction,
        caller: &Caller,
    ) -> Result<AddOutcome> {
        if !self.may_add(caller) {
            info!(caller = ?caller, identity = %reference, "add denied");
            return Ok(AddOutcome::Denied);
        }

        let resolved = resolve(
            self.host.presence.as_ref(),
            self.store.as_ref(),
            reference,
            self.settings.fallback_lookup,
        )
        .await
        .inspect_err(|e| error!(identity = %reference, error = %e, "identity resolution failed"))?;

        let Some(identity) = resolved else {
            return Ok(AddOutcome::IdentityNotFound {
                reference: reference.to_string(),
            });
        };

        let action = draft.build();
        let _guard = self.locks.lock(identity.key).await;

        if self.settings.deliver_if_present && identity.present {
            // Resolution may be stale; only a live presence check counts.
            if let Some(live) = self.host.presence.online_by_key(identity.key) {
                match execute(&self.host, &live, &action) {
                    Execution::Executed { .. } if !action.recurring => {
                        info!(identity = %live.key, action = %action.identifier, "delivered immediately");
                        return Ok(AddOutcome::DeliveredImmediately {
                            identifier: action.identifier,
                            identity: live,
                            retained: false,
                        });
                    }
                    Execution::Executed { .. } => {
                        let identifier = self.append(&live, action).await?;
                        return Ok(AddOutcome::DeliveredImmediately {
                            identity: live,
                            identifier,
                            retained: true,
                        });
                    }
                    Execution::Denied => {
                        info!(identity = %live.key, action = %action.identifier, "online but not permitted yet, queueing");
                    }
                }
            }
        }

        let identifier = self.append(&identity, action).await?;
        info!(identity = %identity.key, name = %identity.display_name, action = %identifier, "action queued");
        Ok(AddOutcome::Queued {
            identity,
            identifier,
        })
    }

    /// Append to the identity's ledger entry, creating it if needed. Caller holds the lock.
    async fn append(&self, identity: &Identity, action: Action) -> Result<ActionId> {
        let existing = self
            .store
            .get(identity.key)
            .await
            .inspect_err(|e| error!(identity = %identity.key, error = %e, "failed to load ledger entry"))?;

        let mut entry = match existing {
            Some(mut entry) => {
                if identity.present {
                    entry.display_name = identity.display_name.clone();
                }
                entry
            }
            None => LedgerEntry::new(identity.key, identity.display_name.clone()),
        };

        let identifier = entry.push(action);
        self.store
            .upsert(&entry)
            .await
            .inspect_err(|e| error!(identity = %identity.key, error = %e, "failed to store action"))?;
        Ok(identifier)
    }

    /// Remove one action (case-insensitive identifier) or all of them.
    ///
    /// The ledger entry is deleted once it has no actions left.
    pub async fn remove_action(
        &self,
        reference: &IdentityRef,
        target: &RemoveTarget,
    ) -> Result<RemoveOutcome> {
        let resolved = resolve(
            self.host.presence.as_ref(),
            self.store.as_ref(),
            reference,
            false,
        )
        .await
        .inspect_err(|e| error!(identity = %reference, error = %e, "identity resolution failed"))?;

        let Some(identity) = resolved else {
            return Ok(RemoveOutcome::NotFound(Missing::Identity));
        };

        // A name queued before the identity was known is stored under its
        // name-derived key until the next delivery merges it.
        let mut candidates = vec![identity.key];
        if let IdentityRef::Name(name) = reference {
            let derived = IdentityKey::from_name(name);
            if derived != identity.key {
                candidates.push(derived);
            }
        }
        let _guards = self.locks.lock_all(&candidates).await;

        let mut found = None;
        for key in candidates {
            let existing = self
                .store
                .get(key)
                .await
                .inspect_err(|e| error!(identity = %key, error = %e, "failed to load ledger entry"))?;
            if existing.is_some() {
                found = existing;
                break;
            }
        }
        let Some(mut entry) = found else {
            return Ok(RemoveOutcome::NotFound(Missing::Identity));
        };

        let removed = match target {
            RemoveTarget::All if entry.is_empty() => {
                return Ok(RemoveOutcome::NotFound(Missing::Action));
            }
            RemoveTarget::All => entry.actions.drain(..).map(|a| a.identifier).collect(),
            RemoveTarget::One(id) => {
                let Some(index) = entry.actions.iter().position(|a| a.identifier.matches(id))
                else {
                    return Ok(RemoveOutcome::NotFound(Missing::Action));
                };
                vec![entry.actions.remove(index).identifier]
            }
        };

        let written = if entry.is_empty() {
            self.store.remove(entry.identity_key).await
        } else {
            if identity.present && entry.identity_key == identity.key {
                entry.display_name = identity.display_name.clone();
            }
            self.store.upsert(&entry).await
        };
        written.inspect_err(|e| error!(identity = %identity.key, error = %e, "failed to write ledger entry"))?;

        info!(identity = %identity.key, removed = removed.len(), remaining = entry.actions.len(), "actions removed");
        Ok(RemoveOutcome::Removed {
            remaining: entry.actions.len(),
            identity,
            removed,
        })
    }

    /// List identities with queued actions, `page_size` identities per page.
    pub async fn list_actions(&self, page: usize, page_size: usize) -> Result<ListOutcome> {
        let entries: Vec<LedgerEntry> = self
            .store
            .list()
            .await
            .inspect_err(|e| error!(error = %e, "failed to list ledger entries"))?
            .into_iter()
            .filter(|entry| !entry.is_empty())
            .collect();

        if entries.is_empty() {
            return Ok(ListOutcome::Empty);
        }

        let pagination = Pagination::new(entries.len(), page_size);
        if !pagination.is_valid(page) {
            warn!(page, total_pages = pagination.total_pages(), "invalid page requested");
            return Ok(ListOutcome::InvalidPage {
                requested: page,
                total_pages: pagination.total_pages(),
            });
        }

        Ok(ListOutcome::Page(Page {
            page,
            page_size: pagination.page_size(),
            total_entries: entries.len(),
            total_pages: pagination.total_pages(),
            next_page: pagination.next_page(page),
            entries: pagination.slice(entries, page),
        }))
    }

    /// Find an action by identifier across every identity.
    pub async fn find_action(&self, identifier: &str) -> Result<Option<(LedgerEntry, Action)>> {
        self.store
            .find_action(identifier)
            .await
            .inspect_err(|e| error!(action = identifier, error = %e, "action lookup failed"))
    }
}
