//! Shared fixtures: an in-process fake host and both storage backends.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use deferq::QueueManager;
use deferq::config::Settings;
use deferq::host::{
    DispatchAs, DispatchFailure, DispatchSink, FeedbackSink, Host, PermissionOracle,
    PlaceholderResolver, PresenceSource,
};
use deferq::model::{Identity, IdentityKey, SoundCue};
use deferq::storage::{DocumentStore, LedgerStore, SqliteStore};
use tempfile::TempDir;
use uuid::Uuid;

/// Records every side effect in order as a short string.
#[derive(Default)]
pub struct FakeHost {
    online: Mutex<HashMap<IdentityKey, String>>,
    known: Mutex<HashMap<IdentityKey, String>>,
    granted: Mutex<HashSet<(IdentityKey, String)>>,
    failing: Mutex<HashSet<String>>,
    pub events: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn connect(&self, key: IdentityKey, name: &str) {
        self.online.lock().unwrap().insert(key, name.to_string());
        self.known.lock().unwrap().insert(key, name.to_string());
    }

    pub fn disconnect(&self, key: IdentityKey) {
        self.online.lock().unwrap().remove(&key);
    }

    /// Seen before, currently offline.
    pub fn remember(&self, key: IdentityKey, name: &str) {
        self.known.lock().unwrap().insert(key, name.to_string());
    }

    pub fn grant(&self, key: IdentityKey, permission: &str) {
        self.granted
            .lock()
            .unwrap()
            .insert((key, permission.to_string()));
    }

    pub fn fail_on(&self, command: &str) {
        self.failing.lock().unwrap().insert(command.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Dispatched command texts, without the runner prefix.
    pub fn dispatched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| {
                e.strip_prefix("dispatch:")
                    .and_then(|rest| rest.split_once(':'))
                    .map(|(_, command)| command.to_string())
            })
            .collect()
    }

    pub fn dispatch_count(&self, command: &str) -> usize {
        self.dispatched().iter().filter(|c| *c == command).count()
    }
}

impl PresenceSource for FakeHost {
    fn online_by_key(&self, key: IdentityKey) -> Option<Identity> {
        let online = self.online.lock().unwrap();
        online.get(&key).map(|name| Identity::online(key, name.clone()))
    }

    fn online_by_name(&self, name: &str) -> Option<Identity> {
        let online = self.online.lock().unwrap();
        online
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(key, n)| Identity::online(*key, n.clone()))
    }

    fn known_by_key(&self, key: IdentityKey) -> Option<String> {
        self.known.lock().unwrap().get(&key).cloned()
    }

    fn known_by_name(&self, name: &str) -> Option<IdentityKey> {
        let known = self.known.lock().unwrap();
        known
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(key, _)| *key)
    }
}

impl DispatchSink for FakeHost {
    fn dispatch(&self, runner: DispatchAs, command: &str) -> Result<(), DispatchFailure> {
        let runner = match runner {
            DispatchAs::System => "system".to_string(),
            DispatchAs::Target(key) => key.to_string(),
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("dispatch:{runner}:{command}"));
        if self.failing.lock().unwrap().contains(command) {
            return Err(DispatchFailure(format!("unknown command: {command}")));
        }
        Ok(())
    }
}

impl PermissionOracle for FakeHost {
    fn has_permission(&self, key: IdentityKey, permission: &str) -> bool {
        self.granted
            .lock()
            .unwrap()
            .contains(&(key, permission.to_string()))
    }
}

impl PlaceholderResolver for FakeHost {
    fn resolve(&self, text: &str, identity: &Identity) -> String {
        text.replace("{playername}", &identity.display_name)
    }
}

impl FeedbackSink for FakeHost {
    fn send_message(&self, _key: IdentityKey, message: &str) {
        self.events.lock().unwrap().push(format!("message:{message}"));
    }

    fn play_sound(&self, _key: IdentityKey, cue: &SoundCue) {
        self.events.lock().unwrap().push(format!("sound:{}", cue.sound));
    }
}

/// A backend plus whatever keeps it alive.
pub struct TestStore {
    pub name: &'static str,
    pub store: Arc<dyn LedgerStore>,
    _dir: Option<TempDir>,
}

impl TestStore {
    /// Directory backing a file-based store.
    pub fn dir(&self) -> Option<&Path> {
        self._dir.as_ref().map(TempDir::path)
    }
}

pub async fn document_store() -> TestStore {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::open(dir.path().join("ledger.json")).await.unwrap();
    TestStore {
        name: "document",
        store: Arc::new(store),
        _dir: Some(dir),
    }
}

pub async fn sqlite_store() -> TestStore {
    TestStore {
        name: "sqlite",
        store: Arc::new(SqliteStore::in_memory().await.unwrap()),
        _dir: None,
    }
}

pub async fn backends() -> Vec<TestStore> {
    vec![document_store().await, sqlite_store().await]
}

/// Settings for tests: no delivery delay, everything else default.
pub fn settings() -> Settings {
    Settings {
        delivery_delay_ms: 0,
        ..Settings::default()
    }
}

pub fn queue(store: &TestStore, settings: Settings) -> (QueueManager, Arc<FakeHost>) {
    let host = Arc::new(FakeHost::default());
    let queue = QueueManager::new(
        Arc::clone(&store.store),
        Host::from_shared(Arc::clone(&host)),
        settings,
    );
    (queue, host)
}

pub fn new_key() -> IdentityKey {
    IdentityKey(Uuid::new_v4())
}
