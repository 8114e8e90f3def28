// error.rs — Error types for the reconciliation workflow.

use std::fmt;

use thiserror::Error;

/// Failures reported by the remote collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The project has no rules document yet. Not a failure of the engine:
    /// it leads to the manual setup path.
    #[error("no rules document exists for '{target}'")]
    NotFound { target: String },

    /// Network, permission or server failure on fetch or publish.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// An authorization token could not be obtained.
    #[error("failed to acquire auth token: {message}")]
    Auth { message: String },
}

impl ClientError {
    pub fn transport(message: impl fmt::Display) -> Self {
        ClientError::Transport {
            message: message.to_string(),
        }
    }

    pub fn auth(message: impl fmt::Display) -> Self {
        ClientError::Auth {
            message: message.to_string(),
        }
    }
}

/// Errors returned by workflow operations.
///
/// Remote failures are not errors here: they move the workflow into
/// `Failed` and are reported through its state. These variants cover calls
/// the workflow refuses to make and local persistence problems.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A publish or verification for this target is still outstanding.
    #[error("a publish or verification for '{target}' is already in progress")]
    Busy { target: String },

    /// The operation is not valid in the current state.
    #[error("invalid transition from {from} to {to} for '{target}'")]
    InvalidTransition {
        target: String,
        from: String,
        to: String,
    },

    /// Approval was requested but no merged document is under review.
    #[error("no reviewed rules to publish for '{target}'")]
    NothingToPublish { target: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize workflow data.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("config error in {path}: {message}")]
    ConfigError { path: String, message: String },
}
