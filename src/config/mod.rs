//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup and fails fast on invalid values. Queue behavior
//! lives in [`Settings`], which is passed explicitly into the queue manager
//! and delivery engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub settings: Settings,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: Backend,
    pub data_dir: PathBuf,
}

/// Which persistence backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Document,
    Sqlite,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Backend::Document => "document",
            Backend::Sqlite => "sqlite",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "json" | "file" => Ok(Backend::Document),
            "sqlite" | "sql" | "relational" => Ok(Backend::Sqlite),
            other => Err(Error::Config(format!("unknown storage backend: {other}"))),
        }
    }
}

/// Queue behavior knobs. Every field has a default, so a partial TOML file works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Run an action immediately when its target is already online.
    pub deliver_if_present: bool,
    /// Ledger entries per page in listings.
    pub page_size: usize,
    /// Accept identities nobody has seen, via best-effort lookup.
    pub fallback_lookup: bool,
    /// Wait after a connection before delivering, in milliseconds.
    pub delivery_delay_ms: u64,
    /// Only the system caller may queue actions.
    pub system_only_add: bool,
    /// Permission an identity caller needs to queue actions. Empty: none.
    pub add_permission: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            deliver_if_present: true,
            page_size: 10,
            fallback_lookup: true,
            delivery_delay_ms: 1000,
            system_only_add: false,
            add_permission: String::new(),
        }
    }
}

impl Settings {
    /// Parse settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad settings {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if settings.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        Ok(settings)
    }

    pub fn delivery_delay(&self) -> Duration {
        Duration::from_millis(self.delivery_delay_ms)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("DEFERQ_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => Backend::Sqlite,
        };
        let data_dir = std::env::var("DEFERQ_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let settings = match std::env::var("DEFERQ_SETTINGS") {
            Ok(path) => Settings::load(Path::new(&path))?,
            Err(_) => Settings::default(),
        };

        Ok(Self {
            storage: StorageConfig { backend, data_dir },
            settings,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
