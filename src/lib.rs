//! # deferq
//!
//! Durable queue of deferred actions: commands that should run on behalf of an
//! identity who is not currently connected.
//!
//! Actions are grouped per identity into ledger entries and persisted through a
//! [`storage::LedgerStore`] (JSON document file or SQLite). The
//! [`queue::QueueManager`] adds, removes, lists and finds actions; the
//! [`delivery::DeliveryEngine`] runs them once their identity connects.
//! Everything host-specific comes in through the traits in [`host`].

pub mod config;
pub mod delivery;
pub mod error;
pub mod host;
pub mod model;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use delivery::{DeliveryEngine, DeliveryOutcome, DeliveryReport};
pub use error::{Error, Result};
pub use queue::{AddOutcome, Caller, IdentityRef, ListOutcome, QueueManager, RemoveOutcome, RemoveTarget};
