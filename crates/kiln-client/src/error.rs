//! Error types for control-plane client operations.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Network, DNS or TLS failure before a response was received.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The control plane answered with a non-2xx structured error.
    ///
    /// The message is the server's error text, surfaced verbatim.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The server reported a terminal failure status for an operation.
    #[error("operation {id} failed: {detail}")]
    OperationFailed { id: String, detail: String },

    /// An operation never reached a terminal state within the deadline.
    ///
    /// Distinct from [`ClientError::OperationFailed`]: the server never
    /// answered, as opposed to answering with a failure.
    #[error("operation {id} still pending after {elapsed:?}")]
    OperationTimeout { id: String, elapsed: Duration },

    /// A client credential could not be loaded or applied.
    #[error("credential error: {0}")]
    Credentials(String),

    /// The response did not match the expected wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this error is the control plane saying "no such entity".
    ///
    /// Used by callers that treat absence as a tolerable outcome, such as
    /// alias lookups and idempotent deletes.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
