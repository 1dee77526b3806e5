use thiserror::Error;

use crate::action::ActionId;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted row {id}: {reason}")]
    CorruptedRow { id: ActionId, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown action: {0}")]
    UnknownAction(ActionId),

    #[error("action {0} already has a subscriber")]
    AlreadySubscribed(ActionId),

    #[error("no tokio runtime available to drive the scheduler")]
    NoRuntime,
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}

/// Terminal error delivered to an action's subscriber.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ActionFailure {
    #[error("superseded by action {by}")]
    Superseded { by: ActionId },

    #[error("rejected by server with HTTP {status}")]
    Rejected { status: u16 },

    #[error("network error: {message}")]
    Network { message: String },
}

/// Errors raised by a [`MutationExecutor`](crate::network::MutationExecutor).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Host unreachable or no network at all.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Any other I/O failure (timeout, reset connection, ...).
    #[error("transient I/O error: {0}")]
    Transient(String),
}
