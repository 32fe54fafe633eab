//! Logging setup and delivery span helpers.
//!
//! Structured logs go through `tracing`; the subscriber is a plain fmt layer
//! filtered by `RUST_LOG`, falling back to the configured level.

use tracing::Span;

use crate::error::{Error, Result};
use crate::model::{ActionId, IdentityKey};

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber was already installed or the fallback
/// level is not a valid filter directive.
pub fn init_logging(default_level: &str) -> Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| Error::Config(format!("invalid log level {default_level:?}: {e}")))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))
}

/// Start a span for one delivery pass.
///
/// `delivery.executed` and `delivery.remaining` are declared empty and filled
/// in when the pass finishes.
pub fn delivery_span(identity: IdentityKey, display_name: &str) -> Span {
    tracing::info_span!(
        "delivery",
        "delivery.identity" = %identity,
        "delivery.name" = display_name,
        "delivery.executed" = tracing::field::Empty,
        "delivery.remaining" = tracing::field::Empty,
    )
}

/// Record the outcome of one action on the given span.
pub fn record_action_outcome(span: &Span, action: &ActionId, outcome: &str) {
    span.in_scope(|| {
        tracing::info!(action = %action, outcome, "action_outcome");
    });
}
