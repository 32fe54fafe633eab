//! Core data model.
//!
//! An action is a command waiting for its target identity to come online.
//! Actions are grouped per identity in a ledger entry, which is the unit the
//! storage backends persist.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Durable identity key. Stable across display-name changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey(pub Uuid);

impl IdentityKey {
    /// Key derived from a display name, for identities nobody has seen yet.
    pub fn from_name(name: &str) -> Self {
        let seed = format!("deferq-offline:{}", name.to_lowercase());
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()))
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IdentityKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// A resolved identity: who it is, what they are called, whether they are here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub key: IdentityKey,
    pub display_name: String,
    pub present: bool,
}

impl Identity {
    pub fn online(key: IdentityKey, display_name: impl Into<String>) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            present: true,
        }
    }

    pub fn offline(key: IdentityKey, display_name: impl Into<String>) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            present: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Short action identifier: the first eight hex digits of a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifiers compare case-insensitively.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who performs the dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    #[default]
    RunAsSystem,
    RunAsTarget,
}

impl ExecutionContext {
    /// Lenient parse. Accepts the canonical names, short forms, and the
    /// legacy `CONSOLE`/`PLAYER` spellings in any case.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "run_as_system" | "system" | "console" => Some(Self::RunAsSystem),
            "run_as_target" | "target" | "player" => Some(Self::RunAsTarget),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionContext::RunAsSystem => "run_as_system",
            ExecutionContext::RunAsTarget => "run_as_target",
        };
        write!(f, "{s}")
    }
}

impl<'de> Deserialize<'de> for ExecutionContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(match raw {
            Value::String(s) => Self::parse_lenient(&s).unwrap_or_else(|| {
                tracing::warn!(value = %s, "unknown execution context, running as system");
                Self::RunAsSystem
            }),
            _ => Self::RunAsSystem,
        })
    }
}

/// Sound played to the target just before the action runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoundCue {
    pub sound: String,
    pub volume: f32,
    pub pitch: f32,
}

impl SoundCue {
    /// Sound used when a stored cue names something unusable.
    pub const FALLBACK_SOUND: &'static str = "block.note_block.chime";

    pub fn new(sound: impl Into<String>) -> Self {
        Self {
            sound: sound.into(),
            volume: 1.0,
            pitch: 1.0,
        }
    }

    pub fn fallback() -> Self {
        Self::new(Self::FALLBACK_SOUND)
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    /// Normalize a sound id, or `None` if it cannot name a sound.
    ///
    /// Ids are lowercased; only ASCII alphanumerics and `_ . : / -` are allowed.
    pub fn normalize_sound(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-'));
        valid.then(|| trimmed.to_ascii_lowercase())
    }

    fn from_value(raw: Value) -> Option<Self> {
        let (sound_raw, volume, pitch) = match raw {
            Value::Null => return None,
            Value::String(s) => (Some(Value::String(s)), None, None),
            Value::Object(mut map) => (
                map.remove("sound"),
                map.remove("volume"),
                map.remove("pitch"),
            ),
            other => {
                tracing::warn!(value = %other, "unreadable audio cue, using fallback");
                return Some(Self::fallback());
            }
        };

        // Older records nest the sound name one level deeper.
        let sound_name = match sound_raw {
            Some(Value::String(s)) => Some(s),
            Some(Value::Object(mut nested)) => match nested.remove("sound") {
                Some(Value::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        };

        let sound = match sound_name.as_deref().and_then(Self::normalize_sound) {
            Some(sound) => sound,
            None => {
                tracing::warn!(sound = ?sound_name, "invalid sound id, using fallback");
                Self::FALLBACK_SOUND.to_string()
            }
        };

        Some(Self {
            sound,
            volume: float_or_default(volume, 1.0),
            pitch: float_or_default(pitch, 1.0),
        })
    }
}

impl Default for SoundCue {
    fn default() -> Self {
        Self::fallback()
    }
}

fn float_or_default(raw: Option<Value>, default: f32) -> f32 {
    match raw {
        Some(Value::Number(n)) => n.as_f64().map(|f| f as f32).unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// A queued command for one identity.
///
/// Every field deserializes leniently: missing or malformed values fall back
/// to documented defaults so that old and partially damaged records load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "ActionId::generate", deserialize_with = "lenient_id")]
    pub identifier: ActionId,

    /// Command text, verbatim. Placeholders are resolved at delivery time.
    #[serde(default, alias = "commandValue", deserialize_with = "lenient_string")]
    pub payload: String,

    #[serde(default, alias = "executor")]
    pub execution_context: ExecutionContext,

    /// Empty means unconditional.
    #[serde(default, alias = "requiredPermission", deserialize_with = "lenient_string")]
    pub required_permission: String,

    /// Shown to the target before the command runs. Empty means silent.
    #[serde(default, alias = "message", deserialize_with = "lenient_string")]
    pub feedback_message: String,

    #[serde(default, alias = "soundStorage", deserialize_with = "lenient_cue")]
    pub audio_cue: Option<SoundCue>,

    /// Recurring actions stay queued after delivery.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub recurring: bool,
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ActionId, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(ActionId(s.trim().to_string())),
        Value::Number(n) => Ok(ActionId(n.to_string())),
        _ => Ok(ActionId::generate()),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_cue<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SoundCue>, D::Error> {
    Ok(SoundCue::from_value(Value::deserialize(deserializer)?))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Ledger Entry
// ---------------------------------------------------------------------------

/// All queued actions for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(alias = "uuid")]
    pub identity_key: IdentityKey,

    /// Best-known display name, refreshed whenever the identity is seen online.
    #[serde(default, alias = "username")]
    pub display_name: String,

    /// Insertion order is preserved.
    #[serde(default, alias = "commands")]
    pub actions: Vec<Action>,
}

impl LedgerEntry {
    pub fn new(identity_key: IdentityKey, display_name: impl Into<String>) -> Self {
        Self {
            identity_key,
            display_name: display_name.into(),
            actions: Vec::new(),
        }
    }

    pub fn find(&self, identifier: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.identifier.matches(identifier))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.find(identifier).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Append an action, regenerating its identifier if a sibling already uses it.
    pub fn push(&mut self, mut action: Action) -> ActionId {
        while self.contains(action.identifier.as_str()) {
            action.identifier = ActionId::generate();
        }
        let id = action.identifier.clone();
        self.actions.push(action);
        id
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a new action. The public way to describe what should be queued.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub(crate) payload: String,
    pub(crate) execution_context: ExecutionContext,
    pub(crate) required_permission: String,
    pub(crate) feedback_message: String,
    pub(crate) audio_cue: Option<SoundCue>,
    pub(crate) recurring: bool,
}

impl NewAction {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            execution_context: ExecutionContext::RunAsSystem,
            required_permission: String::new(),
            feedback_message: String::new(),
            audio_cue: None,
            recurring: false,
        }
    }

    pub fn run_as(mut self, context: ExecutionContext) -> Self {
        self.execution_context = context;
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = permission.into();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.feedback_message = message.into();
        self
    }

    pub fn sound(mut self, cue: SoundCue) -> Self {
        self.audio_cue = Some(cue);
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    /// Materialize the draft with a fresh identifier.
    pub fn build(self) -> Action {
        Action {
            identifier: ActionId::generate(),
            payload: self.payload,
            execution_context: self.execution_context,
            required_permission: self.required_permission,
            feedback_message: self.feedback_message,
            audio_cue: self.audio_cue,
            recurring: self.recurring,
        }
    }
}
