//! Wire types for the operation-based control-plane API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response kind discriminator carried by every API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Completed synchronously; result is in `metadata`.
    Sync,
    /// Accepted; a background operation was created.
    Async,
    /// The request was rejected.
    Error,
}

/// The envelope every control-plane response is wrapped in.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: ResponseKind,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub status_code: u16,

    /// Path of the background operation for async responses,
    /// e.g. `/1.0/operations/<id>`.
    #[serde(default)]
    pub operation: String,

    #[serde(default)]
    pub error_code: u16,

    #[serde(default)]
    pub error: String,

    #[serde(default)]
    pub metadata: Value,
}

impl Envelope {
    /// Extract the operation id from the `operation` path.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        let id = self.operation.rsplit('/').next()?;
        (!id.is_empty()).then_some(id)
    }
}

/// Terminal-or-not status of a background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Success,
    Failure,
}

/// A background operation as reported by `GET /1.0/operations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    pub id: String,

    /// Numeric status: 1xx codes are non-terminal, 200 is success,
    /// anything else is a reported failure.
    #[serde(default)]
    pub status_code: u16,

    /// Server-reported error detail for failed operations.
    #[serde(default)]
    pub err: String,

    /// Result metadata (exec exit code, output references, fingerprint).
    #[serde(default)]
    pub metadata: Value,
}

impl Operation {
    #[must_use]
    pub const fn status(&self) -> OperationStatus {
        match self.status_code {
            100..=199 => OperationStatus::Pending,
            200 => OperationStatus::Success,
            _ => OperationStatus::Failure,
        }
    }
}

/// A cluster member as returned by the placement-target listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterMember {
    pub server_name: String,

    /// Group memberships used for placement filtering.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Image source for instance creation.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSource {
    #[serde(rename = "type")]
    pub kind: String,

    pub alias: String,

    /// Remote image server, when the source image is not local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl InstanceSource {
    /// Source an instance from an image alias.
    #[must_use]
    pub fn image(alias: impl Into<String>) -> Self {
        Self {
            kind: "image".to_owned(),
            alias: alias.into(),
            server: None,
            protocol: None,
        }
    }

    /// Pull the image from a remote server instead of the local store.
    #[must_use]
    pub fn from_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self.protocol = Some("simplestreams".to_owned());
        self
    }
}

/// Request body for `POST /1.0/instances`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub source: InstanceSource,

    /// Placement target, sent as the `target` query parameter.
    #[serde(skip)]
    pub target: String,
}

/// Power action for `PUT /1.0/instances/{name}/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
}

/// Request body for an instance power-state change.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub action: PowerAction,

    /// Seconds the server may spend on the transition.
    pub timeout: u64,

    pub force: bool,
}

impl StateChange {
    #[must_use]
    pub const fn start(timeout: Duration) -> Self {
        Self {
            action: PowerAction::Start,
            timeout: timeout.as_secs(),
            force: false,
        }
    }

    #[must_use]
    pub const fn stop(timeout: Duration, force: bool) -> Self {
        Self {
            action: PowerAction::Stop,
            timeout: timeout.as_secs(),
            force,
        }
    }
}

/// A command to run inside an instance.
///
/// Commands are always structured argv lists. Anything that needs shell
/// semantics must spell out the interpreter explicitly, e.g.
/// `["sh", "-c", "..."]`; the orchestrator never concatenates strings
/// into a shell line.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: Vec<String>,

    /// Capture stdout/stderr so they can be retrieved on failure.
    pub record_output: bool,

    /// How long to wait for the exec operation to reach a terminal state.
    pub wait: Duration,
}

impl ExecRequest {
    #[must_use]
    pub fn new(command: impl IntoIterator<Item = impl Into<String>>, wait: Duration) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            record_output: true,
            wait,
        }
    }
}

/// Outcome of a finished command execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,

    /// Captured stdout, fetched only when the command failed.
    pub stdout: Option<String>,

    /// Captured stderr, fetched only when the command failed.
    pub stderr: Option<String>,
}

impl ExecOutcome {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Request to publish an image from a stopped instance.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub instance: String,
    pub alias: String,
    pub description: String,

    /// How long to wait for the publish operation.
    pub wait: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_async_response() {
        let body = r#"{
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": "/1.0/operations/d1b9d4f0",
            "metadata": {}
        }"#;

        let envelope: Envelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.kind, ResponseKind::Async);
        assert_eq!(envelope.operation_id(), Some("d1b9d4f0"));
    }

    #[test]
    fn envelope_parses_error_response() {
        let body = r#"{
            "type": "error",
            "error": "Instance not found",
            "error_code": 404
        }"#;

        let envelope: Envelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.kind, ResponseKind::Error);
        assert_eq!(envelope.error_code, 404);
        assert_eq!(envelope.error, "Instance not found");
    }

    #[test]
    fn envelope_without_operation_has_no_id() {
        let body = r#"{"type": "sync", "metadata": null}"#;
        let envelope: Envelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.operation_id(), None);
    }

    #[test]
    fn operation_status_from_code() {
        let mut op = Operation {
            id: "x".to_owned(),
            status_code: 103,
            err: String::new(),
            metadata: Value::Null,
        };
        assert_eq!(op.status(), OperationStatus::Pending);

        op.status_code = 200;
        assert_eq!(op.status(), OperationStatus::Success);

        op.status_code = 400;
        assert_eq!(op.status(), OperationStatus::Failure);
    }

    #[test]
    fn state_change_serializes_action() {
        let change = StateChange::stop(Duration::from_secs(30), true);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["action"], "stop");
        assert_eq!(json["timeout"], 30);
        assert_eq!(json["force"], true);
    }

    #[test]
    fn instance_source_from_remote_server() {
        let source = InstanceSource::image("ubuntu/22.04").from_server("https://images.example");
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["server"], "https://images.example");
        assert_eq!(json["protocol"], "simplestreams");
    }
}
