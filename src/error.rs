//! Error types for deferq.
//!
//! Only faults live here. Expected outcomes such as a denied add, an unknown
//! identity, or an out-of-range page are returned as outcome enums by the
//! queue manager.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A backend I/O or (de)serialization fault.
    #[error("storage failure during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A persisted record that cannot be recovered with field defaults.
    #[error("malformed ledger record for {identity}: {reason}")]
    MalformedAction { identity: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a backend fault with the name of the operation that raised it.
    pub fn storage(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Storage {
            operation,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
