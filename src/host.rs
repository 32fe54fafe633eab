//! Host collaborators.
//!
//! The queue never talks to the outside world directly. Presence, command
//! dispatch, permission checks, placeholder expansion and presentation effects
//! are all supplied by the embedding host through these traits.

use std::sync::Arc;

use thiserror::Error;

use crate::model::{Identity, IdentityKey, SoundCue};

/// Presence and identity lookups.
pub trait PresenceSource: Send + Sync {
    /// The connected identity with this key, if any.
    fn online_by_key(&self, key: IdentityKey) -> Option<Identity>;

    /// The connected identity with this display name (case-insensitive), if any.
    fn online_by_name(&self, name: &str) -> Option<Identity>;

    /// Display name of an identity that has connected at some point.
    fn known_by_key(&self, key: IdentityKey) -> Option<String>;

    /// Key of an identity that has connected at some point under this name.
    fn known_by_name(&self, name: &str) -> Option<IdentityKey>;

    /// Non-authoritative reverse lookup for a name nobody has seen here.
    fn best_effort_lookup(&self, _name: &str) -> Option<IdentityKey> {
        None
    }

    fn is_present(&self, key: IdentityKey) -> bool {
        self.online_by_key(key).is_some()
    }
}

/// Who a dispatched command runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAs {
    System,
    Target(IdentityKey),
}

#[derive(Debug, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchFailure(pub String);

pub trait DispatchSink: Send + Sync {
    fn dispatch(&self, runner: DispatchAs, command: &str) -> Result<(), DispatchFailure>;
}

pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self, key: IdentityKey, permission: &str) -> bool;
}

/// Placeholder expansion, e.g. `{playername}`.
pub trait PlaceholderResolver: Send + Sync {
    fn resolve(&self, text: &str, identity: &Identity) -> String;
}

/// Fire-and-forget presentation effects.
pub trait FeedbackSink: Send + Sync {
    fn send_message(&self, key: IdentityKey, message: &str);
    fn play_sound(&self, key: IdentityKey, cue: &SoundCue);
}

/// Everything the core needs from its host, bundled for construction.
#[derive(Clone)]
pub struct Host {
    pub presence: Arc<dyn PresenceSource>,
    pub dispatcher: Arc<dyn DispatchSink>,
    pub permissions: Arc<dyn PermissionOracle>,
    pub placeholders: Arc<dyn PlaceholderResolver>,
    pub feedback: Arc<dyn FeedbackSink>,
}

impl Host {
    /// Bundle a single value implementing every collaborator trait.
    pub fn from_shared<T>(host: Arc<T>) -> Self
    where
        T: PresenceSource
            + DispatchSink
            + PermissionOracle
            + PlaceholderResolver
            + FeedbackSink
            + 'static,
    {
        Self {
            presence: host.clone(),
            dispatcher: host.clone(),
            permissions: host.clone(),
            placeholders: host.clone(),
            feedback: host,
        }
    }

    /// Empty permissions are granted without asking the oracle.
    pub fn permits(&self, key: IdentityKey, permission: &str) -> bool {
        permission.is_empty() || self.permissions.has_permission(key, permission)
    }
}
