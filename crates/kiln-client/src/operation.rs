//! Waiting on asynchronous control-plane operations.
//!
//! The API answers mutating requests with an operation handle that must be
//! polled to learn its terminal outcome. The poller turns that into a
//! blocking-with-timeout wait and keeps the three exits distinct: success,
//! server-reported failure, and deadline exceeded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::http::ApiClient;
use crate::types::{Operation, OperationStatus};

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Anything that can report the current state of an operation.
///
/// [`ApiClient`] is the production source; tests script one.
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn operation(&self, id: &str) -> Result<Operation>;
}

#[async_trait]
impl OperationSource for ApiClient {
    async fn operation(&self, id: &str) -> Result<Operation> {
        let envelope = self
            .call(Method::GET, &format!("/1.0/operations/{id}"), None)
            .await?;
        serde_json::from_value(envelope.metadata)
            .map_err(|e| ClientError::Protocol(format!("malformed operation {id}: {e}")))
    }
}

/// Polls an operation at a fixed interval until it reaches a terminal
/// state or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    interval: Duration,
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl OperationPoller {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Wait for `id` to reach a terminal state.
    ///
    /// Returns the finished operation on success. A server-reported
    /// failure returns [`ClientError::OperationFailed`] immediately,
    /// without waiting out the remaining budget. If the operation is
    /// still pending when `timeout` elapses, the distinct
    /// [`ClientError::OperationTimeout`] is returned instead.
    pub async fn wait(
        &self,
        source: &dyn OperationSource,
        id: &str,
        timeout: Duration,
    ) -> Result<Operation> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            let op = source.operation(id).await?;

            match op.status() {
                OperationStatus::Success => {
                    debug!(id, elapsed = ?started.elapsed(), "operation succeeded");
                    return Ok(op);
                }
                OperationStatus::Failure => {
                    return Err(ClientError::OperationFailed {
                        id: id.to_owned(),
                        detail: op.err,
                    });
                }
                OperationStatus::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ClientError::OperationTimeout {
                            id: id.to_owned(),
                            elapsed: started.elapsed(),
                        });
                    }
                    tokio::time::sleep(self.interval.min(deadline - now)).await;
                }
            }
        }
    }
}
