//! The bake pipeline: one run from target selection to published image.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiln_client::ControlPlane;

use crate::config::BakeConfig;
use crate::error::{BakeError, BakeResult};
use crate::guard::CleanupGuard;
use crate::lifecycle::{run_instance_name, InstanceLifecycle};
use crate::manifest::Manifest;
use crate::provision::Provisioner;
use crate::publish::ImagePublisher;
use crate::selector::select_member;

/// Pipeline progress, logged at every transition.
///
/// Cleanup is reachable from every non-terminal state on error and
/// always converges to the instance being deleted before the run
/// reports failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    TargetSelected,
    InstanceCreated,
    InstanceRunning,
    Provisioning,
    InstanceStopped,
    ImagePublished,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TargetSelected => "target-selected",
            Self::InstanceCreated => "instance-created",
            Self::InstanceRunning => "instance-running",
            Self::Provisioning => "provisioning",
            Self::InstanceStopped => "instance-stopped",
            Self::ImagePublished => "image-published",
        };
        write!(f, "{name}")
    }
}

fn advance(state: &mut RunState, to: RunState) {
    debug!(from = %state, to = %to, "pipeline state");
    *state = to;
}

/// Result of a successful bake run.
#[derive(Debug, Clone)]
pub struct BakeOutcome {
    pub alias: String,
    pub fingerprint: String,
    pub instance: String,
}

/// Run the full bake pipeline.
///
/// Sequence: validate configuration, load the manifest, select a
/// placement target, create and start the instance, apply the
/// provisioning steps, stop, publish under `alias`, and tear the
/// instance down. The cleanup guard is armed once instance creation is
/// attempted and covers every exit path from there, including
/// interruption via `cancel`; a cleanup failure never masks the error
/// that caused it. Failures before creation (configuration, manifest,
/// target selection) issue no teardown calls at all.
pub async fn run(
    plane: &dyn ControlPlane,
    config: &BakeConfig,
    alias: &str,
    keep_instance: bool,
    cancel: &CancellationToken,
) -> BakeResult<BakeOutcome> {
    // Everything up to here must fail without a single remote call.
    config.validate()?;
    let manifest = Manifest::load(&config.provision.manifest)?;

    let members = plane.cluster_members().await?;
    let target = select_member(&members, &config.placement.group)?;

    let name = run_instance_name(alias);
    let mut guard = CleanupGuard::new(
        plane,
        name.as_str(),
        config.instance.stop_timeout(),
        config.timeouts.delete(),
    );

    info!(alias, instance = %name, target = %target, steps = manifest.steps.len(), "bake run starting");

    let result = tokio::select! {
        r = bake_inner(plane, config, alias, &name, &manifest, &target) => r,
        () = cancel.cancelled() => {
            warn!(instance = %name, "run interrupted, cleaning up");
            Err(BakeError::Interrupted)
        }
    };

    if let Err(e) = &result {
        debug!(error = %e, "entering cleanup");
    }

    if keep_instance {
        guard.disarm();
    } else {
        guard.run().await;
        verify_absent(plane, &name).await;
    }

    result.map(|fingerprint| BakeOutcome {
        alias: alias.to_owned(),
        fingerprint,
        instance: name,
    })
}

async fn bake_inner(
    plane: &dyn ControlPlane,
    config: &BakeConfig,
    alias: &str,
    name: &str,
    manifest: &Manifest,
    target: &str,
) -> BakeResult<String> {
    let mut state = RunState::TargetSelected;

    let lifecycle = InstanceLifecycle::new(plane, name.to_owned());
    lifecycle
        .create(&config.instance, &config.timeouts, target)
        .await?;
    advance(&mut state, RunState::InstanceCreated);

    lifecycle.start(&config.instance).await?;
    advance(&mut state, RunState::InstanceRunning);

    advance(&mut state, RunState::Provisioning);
    let provisioner = Provisioner::new(plane, lifecycle.name(), &config.timeouts);
    provisioner.apply(manifest).await?;

    lifecycle.stop(&config.instance, false).await?;
    advance(&mut state, RunState::InstanceStopped);

    let publisher = ImagePublisher::new(plane, &config.timeouts);
    let fingerprint = publisher
        .publish(lifecycle.name(), alias, &config.publish.description)
        .await?;
    advance(&mut state, RunState::ImagePublished);

    Ok(fingerprint)
}

/// Post-run check that the ephemeral instance is gone.
async fn verify_absent(plane: &dyn ControlPlane, name: &str) {
    match plane.instance_exists(name).await {
        Ok(false) => debug!(instance = name, "instance absent after run"),
        Ok(true) => warn!(instance = name, "instance still present after cleanup"),
        Err(e) => debug!(instance = name, error = %e, "could not verify instance absence"),
    }
}
