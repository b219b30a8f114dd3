//! Error types for the bake pipeline.

use thiserror::Error;

/// Errors that abort a bake run.
///
/// Every variant is fatal: the pipeline stops, the cleanup guard tears
/// the instance down, and the process exits non-zero with the original
/// error. Cleanup failures themselves are logged as warnings and never
/// replace the triggering error.
#[derive(Error, Debug)]
pub enum BakeError {
    /// Missing or invalid configuration, raised before any remote call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Placement selection found no member in the required group.
    #[error("no cluster member belongs to group '{group}'")]
    NoEligibleTarget { group: String },

    /// Transport, API, or operation error from the control plane.
    #[error(transparent)]
    Client(#[from] kiln_client::ClientError),

    /// A provisioning command exited non-zero.
    #[error(
        "command `{command}` exited with status {exit_code}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    CommandFailed {
        command: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    /// The alias did not resolve to the freshly published fingerprint.
    ///
    /// Distinct from a publish-operation failure: the server accepted
    /// the publish but the alias binding did not take effect.
    #[error("alias '{alias}' does not resolve to the published image")]
    PublishVerification { alias: String },

    /// The guest never answered the readiness probe.
    #[error("instance '{name}' not ready after {elapsed:?}: {last_error}")]
    NotReady {
        name: String,
        elapsed: std::time::Duration,
        last_error: String,
    },

    /// The provisioning manifest could not be read or is malformed.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The run was interrupted by an external signal.
    #[error("interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BakeResult<T> = Result<T, BakeError>;
