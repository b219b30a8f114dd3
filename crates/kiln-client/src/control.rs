//! High-level control-plane surface.
//!
//! [`ControlPlane`] is the seam between the orchestrator and the remote
//! API: every method already waits for the underlying operation to reach
//! a terminal state, so callers sequence steps without touching operation
//! handles. [`RestControlPlane`] is the production implementation; tests
//! substitute a recording mock.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::http::{ApiClient, ClientConfig};
use crate::operation::OperationPoller;
use crate::types::{
    ClusterMember, CreateInstanceRequest, Envelope, ExecOutcome, ExecRequest, PublishRequest,
    StateChange,
};

/// Extra budget given to an operation wait beyond the server-side
/// timeout carried in the request itself.
const STATE_WAIT_MARGIN: Duration = Duration::from_secs(30);

/// Operations the orchestrator needs from the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List placement targets with their group memberships.
    async fn cluster_members(&self) -> Result<Vec<ClusterMember>>;

    /// Create an instance and wait for the creation operation.
    async fn create_instance(&self, req: &CreateInstanceRequest, wait: Duration) -> Result<()>;

    /// Change instance power state and wait for completion.
    async fn change_instance_state(&self, name: &str, change: &StateChange) -> Result<()>;

    /// Whether an instance currently exists.
    async fn instance_exists(&self, name: &str) -> Result<bool>;

    /// Delete an instance and wait for completion.
    ///
    /// Deleting an already-absent instance surfaces the control plane's
    /// not-found error; tolerating it is the caller's decision.
    async fn delete_instance(&self, name: &str, wait: Duration) -> Result<()>;

    /// Run a command inside an instance and wait for its exit.
    ///
    /// On non-zero exit with output recording enabled, the captured
    /// stdout/stderr are fetched and attached to the outcome so failures
    /// are diagnosable without re-entering the instance.
    async fn exec(&self, name: &str, req: &ExecRequest) -> Result<ExecOutcome>;

    /// Write a file into the instance filesystem (full overwrite).
    async fn push_file(&self, name: &str, dest: &str, content: Vec<u8>) -> Result<()>;

    /// Resolve an image alias to its fingerprint, `None` when unbound.
    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>>;

    /// Delete a published image by fingerprint and wait for completion.
    async fn delete_image(&self, fingerprint: &str, wait: Duration) -> Result<()>;

    /// Publish an image from a stopped instance, returning the new
    /// fingerprint.
    async fn publish_image(&self, req: &PublishRequest) -> Result<String>;
}

/// Unwrap a fetched output log, downgrading a fetch failure to a
/// warning so the missing diagnostics are visible without failing the
/// exec itself.
fn log_text(fetched: Result<String>, operation: &str, stream: &str) -> Option<String> {
    match fetched {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(operation, stream, error = %e, "could not fetch command output log");
            None
        }
    }
}

/// [`ControlPlane`] backed by the REST API.
pub struct RestControlPlane {
    client: ApiClient,
    poller: OperationPoller,
}

impl RestControlPlane {
    /// Build the production control plane from connection settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: ApiClient::new(config)?,
            poller: OperationPoller::default(),
        })
    }

    /// Override the poll interval (shortened in integration tests).
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poller = OperationPoller::new(interval);
        self
    }

    /// Wait out the async operation referenced by an envelope.
    async fn wait_operation(
        &self,
        envelope: &Envelope,
        wait: Duration,
    ) -> Result<crate::types::Operation> {
        let id = envelope.operation_id().ok_or_else(|| {
            ClientError::Protocol("async response without an operation path".to_owned())
        })?;
        self.poller.wait(&self.client, id, wait).await
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn cluster_members(&self) -> Result<Vec<ClusterMember>> {
        let envelope = self
            .client
            .request(Method::GET, "/1.0/cluster/members", &[("recursion", "1")], None)
            .await?;
        serde_json::from_value(envelope.metadata)
            .map_err(|e| ClientError::Protocol(format!("malformed member list: {e}")))
    }

    async fn create_instance(&self, req: &CreateInstanceRequest, wait: Duration) -> Result<()> {
        let body = serde_json::to_value(req)?;
        let envelope = self
            .client
            .request(
                Method::POST,
                "/1.0/instances",
                &[("target", &req.target)],
                Some(&body),
            )
            .await?;
        self.wait_operation(&envelope, wait).await?;
        debug!(name = %req.name, target = %req.target, "instance created");
        Ok(())
    }

    async fn change_instance_state(&self, name: &str, change: &StateChange) -> Result<()> {
        let body = serde_json::to_value(change)?;
        let envelope = self
            .client
            .call(
                Method::PUT,
                &format!("/1.0/instances/{name}/state"),
                Some(&body),
            )
            .await?;
        let wait = Duration::from_secs(change.timeout) + STATE_WAIT_MARGIN;
        self.wait_operation(&envelope, wait).await?;
        Ok(())
    }

    async fn instance_exists(&self, name: &str) -> Result<bool> {
        match self
            .client
            .call(Method::GET, &format!("/1.0/instances/{name}"), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_instance(&self, name: &str, wait: Duration) -> Result<()> {
        let envelope = self
            .client
            .call(Method::DELETE, &format!("/1.0/instances/{name}"), None)
            .await?;
        self.wait_operation(&envelope, wait).await?;
        Ok(())
    }

    async fn exec(&self, name: &str, req: &ExecRequest) -> Result<ExecOutcome> {
        let body = json!({
            "command": req.command,
            "record-output": req.record_output,
            "wait-for-websocket": false,
            "interactive": false,
        });
        let envelope = self
            .client
            .call(
                Method::POST,
                &format!("/1.0/instances/{name}/exec"),
                Some(&body),
            )
            .await?;
        let op = self.wait_operation(&envelope, req.wait).await?;

        let exit_code = op
            .metadata
            .get("return")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| {
                ClientError::Protocol(format!("exec operation {} has no exit code", op.id))
            })?;

        // Output logs are only worth a round trip when something failed.
        let (stdout, stderr) = if exit_code != 0 && req.record_output {
            let fetch = |stream: &str| {
                op.metadata
                    .get("output")
                    .and_then(|o| o.get(stream))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            };
            let stdout = match fetch("1") {
                Some(path) => log_text(self.client.get_raw(&path).await, &op.id, "stdout"),
                None => None,
            };
            let stderr = match fetch("2") {
                Some(path) => log_text(self.client.get_raw(&path).await, &op.id, "stderr"),
                None => None,
            };
            (stdout, stderr)
        } else {
            (None, None)
        };

        Ok(ExecOutcome {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn push_file(&self, name: &str, dest: &str, content: Vec<u8>) -> Result<()> {
        self.client
            .post_bytes(
                &format!("/1.0/instances/{name}/files"),
                &[("path", dest)],
                content,
            )
            .await?;
        debug!(instance = name, dest, "file pushed");
        Ok(())
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>> {
        match self
            .client
            .call(Method::GET, &format!("/1.0/images/aliases/{alias}"), None)
            .await
        {
            Ok(envelope) => {
                let fingerprint = envelope
                    .metadata
                    .get("target")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| {
                        ClientError::Protocol(format!("alias {alias} has no target fingerprint"))
                    })?;
                Ok(Some(fingerprint.to_owned()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_image(&self, fingerprint: &str, wait: Duration) -> Result<()> {
        let envelope = self
            .client
            .call(Method::DELETE, &format!("/1.0/images/{fingerprint}"), None)
            .await?;
        self.wait_operation(&envelope, wait).await?;
        Ok(())
    }

    async fn publish_image(&self, req: &PublishRequest) -> Result<String> {
        let body = json!({
            "source": {"type": "instance", "name": req.instance},
            "aliases": [{"name": req.alias, "description": req.description}],
            "properties": {"description": req.description},
        });
        let envelope = self
            .client
            .call(Method::POST, "/1.0/images", Some(&body))
            .await?;
        let op = self.wait_operation(&envelope, req.wait).await?;

        op.metadata
            .get("fingerprint")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ClientError::Protocol(format!("publish operation {} has no fingerprint", op.id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetched_log_passes_through() {
        assert_eq!(
            log_text(Ok("boom".to_owned()), "op1", "stderr"),
            Some("boom".to_owned())
        );
    }

    #[test]
    fn failed_log_fetch_yields_none_not_empty() {
        let err = ClientError::Api {
            status: 500,
            message: "log store down".to_owned(),
        };
        assert_eq!(log_text(Err(err), "op1", "stderr"), None);
    }
}
