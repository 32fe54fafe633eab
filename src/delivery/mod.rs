//! Delivery engine: drains an identity's queued actions when it connects.

pub mod execute;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::config::Settings;
use crate::error::Result;
use crate::host::Host;
use crate::model::{ActionId, IdentityKey, LedgerEntry};
use crate::queue::locks::IdentityLocks;
use crate::storage::LedgerStore;
use crate::telemetry::{delivery_span, record_action_outcome};

pub use execute::Execution;
use execute::execute;

/// Result of one delivery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The identity was gone by the time the pass started. Nothing happened.
    Cancelled,
    /// No ledger entry for this identity.
    NothingQueued,
    Delivered(DeliveryReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Actions whose side effects ran, including ones whose dispatch failed.
    pub executed: Vec<ActionId>,
    /// Actions skipped for lack of permission; still queued.
    pub denied: Vec<ActionId>,
    /// Subset of `executed` that the host refused to dispatch.
    pub dispatch_failures: Vec<ActionId>,
    /// Actions left in the ledger after the pass.
    pub remaining: usize,
}

/// Presence-triggered delivery. Cheap to clone; clones share the store and locks.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<dyn LedgerStore>,
    host: Host,
    settings: Settings,
    locks: Arc<IdentityLocks>,
}

impl DeliveryEngine {
    pub(crate) fn new(
        store: Arc<dyn LedgerStore>,
        host: Host,
        settings: Settings,
        locks: Arc<IdentityLocks>,
    ) -> Self {
        Self {
            store,
            host,
            settings,
            locks,
        }
    }

    /// React to an identity connecting: wait out the configured delay, then deliver.
    ///
    /// If the identity disconnects during the delay the pass is cancelled.
    pub fn identity_connected(
        &self,
        key: IdentityKey,
        display_name: impl Into<String>,
    ) -> JoinHandle<Result<DeliveryOutcome>> {
        let engine = self.clone();
        let display_name = display_name.into();
        let delay = self.settings.delivery_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.deliver(key, &display_name).await
        })
    }

    /// Run one delivery pass now.
    ///
    /// Side effects that already ran are not rolled back if the final write
    /// fails; the error is logged and returned.
    pub async fn deliver(&self, key: IdentityKey, display_name: &str) -> Result<DeliveryOutcome> {
        let span = delivery_span(key, display_name);

        async {
            let Some(identity) = self.host.presence.online_by_key(key) else {
                debug!("identity left before delivery, cancelled");
                return Ok(DeliveryOutcome::Cancelled);
            };

            // Actions queued by name before this identity was known sit under
            // a name-derived key; they are merged in and delivered with the rest.
            let mut derived: Vec<IdentityKey> = [display_name, identity.display_name.as_str()]
                .into_iter()
                .filter(|name| !name.is_empty())
                .map(IdentityKey::from_name)
                .filter(|derived| *derived != key)
                .collect();
            derived.dedup();
            let mut locked = derived.clone();
            locked.push(key);
            let _guards = self.locks.lock_all(&locked).await;

            let existing = self.store.get(key).await.inspect_err(|e| {
                error!(identity = %key, error = %e, "failed to load ledger entry");
            })?;
            let mut stray = Vec::new();
            for derived_key in derived {
                let found = self.store.get(derived_key).await.inspect_err(|e| {
                    error!(identity = %derived_key, error = %e, "failed to load ledger entry");
                })?;
                stray.extend(found);
            }

            if existing.is_none() && stray.is_empty() {
                return Ok(DeliveryOutcome::NothingQueued);
            }
            let mut entry =
                existing.unwrap_or_else(|| LedgerEntry::new(key, identity.display_name.clone()));
            for old in &stray {
                debug!(from = %old.identity_key, actions = old.actions.len(), "merging actions queued by name");
                for action in old.actions.iter().cloned() {
                    entry.push(action);
                }
            }

            let mut report = DeliveryReport::default();
            let mut kept = Vec::with_capacity(entry.actions.len());

            for action in std::mem::take(&mut entry.actions) {
                match execute(&self.host, &identity, &action) {
                    Execution::Denied => {
                        record_action_outcome(&span, &action.identifier, "denied");
                        report.denied.push(action.identifier.clone());
                        kept.push(action);
                    }
                    Execution::Executed { dispatch_failed } => {
                        let outcome = if dispatch_failed { "dispatch_failed" } else { "executed" };
                        record_action_outcome(&span, &action.identifier, outcome);
                        if dispatch_failed {
                            report.dispatch_failures.push(action.identifier.clone());
                        }
                        report.executed.push(action.identifier.clone());
                        if action.recurring {
                            kept.push(action);
                        }
                    }
                }
            }

            entry.actions = kept;
            if !display_name.is_empty() {
                entry.display_name = display_name.to_string();
            } else if !identity.display_name.is_empty() {
                entry.display_name = identity.display_name.clone();
            }
            report.remaining = entry.actions.len();

            // Merged entries are removed before `key` is written; whatever they
            // still owe is in `entry` now.
            let mut written = Ok(());
            for old in &stray {
                written = self.store.remove(old.identity_key).await;
                if written.is_err() {
                    break;
                }
            }
            if written.is_ok() {
                written = if entry.is_empty() {
                    self.store.remove(key).await
                } else {
                    self.store.upsert(&entry).await
                };
            }
            if let Err(e) = written {
                error!(
                    identity = %key,
                    executed = report.executed.len(),
                    error = %e,
                    "delivered actions could not be written back"
                );
                return Err(e);
            }

            span.record("delivery.executed", report.executed.len());
            span.record("delivery.remaining", report.remaining);
            info!(
                executed = report.executed.len(),
                denied = report.denied.len(),
                remaining = report.remaining,
                "delivery finished"
            );
            Ok(DeliveryOutcome::Delivered(report))
        }
        .instrument(span.clone())
        .await
    }
}
