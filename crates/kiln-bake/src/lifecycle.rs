//! Ephemeral instance lifecycle.
//!
//! One lifecycle per run, owning the instance identity from creation
//! through provisioning. Teardown is not here: deletion belongs to the
//! cleanup guard, which is the single place allowed to remove the
//! instance.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use kiln_client::{ControlPlane, CreateInstanceRequest, ExecRequest, InstanceSource, StateChange};

use crate::config::{InstanceConfig, TimeoutsConfig};
use crate::error::{BakeError, BakeResult};

const READY_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Generate a collision-free instance name for this run.
///
/// Time plus process id keeps concurrent runs from racing for the same
/// instance, even when they target the same alias.
#[must_use]
pub fn run_instance_name(alias: &str) -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("kiln-{alias}-{secs}-{}", std::process::id())
}

/// Creates, starts and stops the ephemeral instance.
pub struct InstanceLifecycle<'a> {
    plane: &'a dyn ControlPlane,
    name: String,
}

impl<'a> InstanceLifecycle<'a> {
    #[must_use]
    pub const fn new(plane: &'a dyn ControlPlane, name: String) -> Self {
        Self { plane, name }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the instance on the chosen placement target.
    pub async fn create(
        &self,
        config: &InstanceConfig,
        timeouts: &TimeoutsConfig,
        target: &str,
    ) -> BakeResult<()> {
        let mut source = InstanceSource::image(&config.source_alias);
        if let Some(server) = &config.source_server {
            source = source.from_server(server);
        }

        let request = CreateInstanceRequest {
            name: self.name.clone(),
            source,
            target: target.to_owned(),
        };

        info!(instance = %self.name, target, source = %config.source_alias, "creating instance");
        self.plane.create_instance(&request, timeouts.create()).await?;
        Ok(())
    }

    /// Start the instance and wait for the guest to become serviceable.
    ///
    /// After the start operation completes, a grace delay is applied and
    /// then the readiness command is probed until it exits 0 or the
    /// readiness budget runs out.
    pub async fn start(&self, config: &InstanceConfig) -> BakeResult<()> {
        info!(instance = %self.name, "starting instance");
        self.plane
            .change_instance_state(&self.name, &StateChange::start(config.start_timeout()))
            .await?;

        tokio::time::sleep(config.ready_grace()).await;
        self.wait_ready(config).await
    }

    async fn wait_ready(&self, config: &InstanceConfig) -> BakeResult<()> {
        let started = Instant::now();
        let deadline = started + config.ready_timeout();
        let mut last_error = String::from("probe never ran");

        while Instant::now() < deadline {
            let probe = ExecRequest::new(config.ready_command.clone(), READY_PROBE_INTERVAL * 5);
            match self.plane.exec(&self.name, &probe).await {
                Ok(outcome) if outcome.success() => {
                    info!(instance = %self.name, elapsed = ?started.elapsed(), "instance ready");
                    return Ok(());
                }
                Ok(outcome) => {
                    last_error = format!("readiness probe exited {}", outcome.exit_code);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            debug!(instance = %self.name, last_error, "instance not ready yet");
            tokio::time::sleep(READY_PROBE_INTERVAL).await;
        }

        Err(BakeError::NotReady {
            name: self.name.clone(),
            elapsed: started.elapsed(),
            last_error,
        })
    }

    /// Stop the instance.
    pub async fn stop(&self, config: &InstanceConfig, force: bool) -> BakeResult<()> {
        info!(instance = %self.name, "stopping instance");
        self.plane
            .change_instance_state(&self.name, &StateChange::stop(config.stop_timeout(), force))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names_are_unique_over_time() {
        let a = run_instance_name("web");
        assert!(a.starts_with("kiln-web-"));
        assert!(a.ends_with(&std::process::id().to_string()));
    }
}
