//! Running one action against a present identity.
//!
//! Shared by the delivery engine and the queue manager's deliver-if-present
//! path so both apply permission, feedback, sound and dispatch identically.

use crate::host::{DispatchAs, Host};
use crate::model::{Action, ExecutionContext, Identity};

/// What happened to one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The identity lacks the required permission. Nothing ran.
    Denied,
    /// Side effects ran. `dispatch_failed` is set if the host rejected the command.
    Executed { dispatch_failed: bool },
}

pub(crate) fn execute(host: &Host, identity: &Identity, action: &Action) -> Execution {
    if !host.permits(identity.key, &action.required_permission) {
        tracing::debug!(
            action = %action.identifier,
            permission = %action.required_permission,
            "permission denied, action stays queued"
        );
        return Execution::Denied;
    }

    // Message text is handed over raw; templating and markup belong to the sink.
    if !action.feedback_message.is_empty() {
        host.feedback.send_message(identity.key, &action.feedback_message);
    }
    if let Some(cue) = &action.audio_cue {
        host.feedback.play_sound(identity.key, cue);
    }

    let command = strip_command_prefix(&action.payload);
    if command.is_empty() {
        tracing::warn!(action = %action.identifier, "action has no command text, nothing dispatched");
        return Execution::Executed {
            dispatch_failed: false,
        };
    }
    let command = host.placeholders.resolve(command, identity);

    let runner = match action.execution_context {
        ExecutionContext::RunAsSystem => DispatchAs::System,
        ExecutionContext::RunAsTarget => DispatchAs::Target(identity.key),
    };

    match host.dispatcher.dispatch(runner, &command) {
        Ok(()) => Execution::Executed {
            dispatch_failed: false,
        },
        Err(e) => {
            tracing::warn!(action = %action.identifier, identity = %identity.key, error = %e, "dispatch failed");
            Execution::Executed {
                dispatch_failed: true,
            }
        }
    }
}

/// Commands may be stored with a leading slash; the dispatcher takes them without.
fn strip_command_prefix(payload: &str) -> &str {
    let trimmed = payload.trim();
    trimmed.strip_prefix('/').unwrap_or(trimmed)
}
