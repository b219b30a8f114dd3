//! Cleanup guard for the ephemeral instance.

use std::time::Duration;

use tracing::{debug, info, warn};

use kiln_client::{ControlPlane, StateChange};

/// Guarantees the ephemeral instance is torn down exactly once.
///
/// Active from the moment creation is attempted until the run ends. On
/// every exit path — success, propagated error, interruption — the
/// caller drives [`CleanupGuard::run`], which stops (best effort) and
/// deletes (tolerating absence) the instance. The first completion wins;
/// re-entry is a no-op. Failures here are logged as warnings and never
/// replace the error that triggered cleanup.
pub struct CleanupGuard<'a> {
    plane: &'a dyn ControlPlane,
    instance: String,
    stop_timeout: Duration,
    delete_wait: Duration,
    completed: bool,
}

impl<'a> CleanupGuard<'a> {
    #[must_use]
    pub fn new(
        plane: &'a dyn ControlPlane,
        instance: impl Into<String>,
        stop_timeout: Duration,
        delete_wait: Duration,
    ) -> Self {
        Self {
            plane,
            instance: instance.into(),
            stop_timeout,
            delete_wait,
            completed: false,
        }
    }

    /// Skip teardown entirely (debugging aid).
    pub fn disarm(&mut self) {
        if !self.completed {
            warn!(instance = %self.instance, "cleanup disarmed, instance left in place");
            self.completed = true;
        }
    }

    /// Stop and delete the instance. Idempotent.
    pub async fn run(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        // Forced stop: the instance may be anywhere between mid-creation
        // and already stopped, and all of those are fine.
        match self
            .plane
            .change_instance_state(&self.instance, &StateChange::stop(self.stop_timeout, true))
            .await
        {
            Ok(()) => debug!(instance = %self.instance, "instance stopped during cleanup"),
            Err(e) if e.is_not_found() => {
                debug!(instance = %self.instance, "instance absent, nothing to stop");
            }
            Err(e) => {
                debug!(instance = %self.instance, error = %e, "cleanup stop failed (may already be stopped)");
            }
        }

        match self
            .plane
            .delete_instance(&self.instance, self.delete_wait)
            .await
        {
            Ok(()) => info!(instance = %self.instance, "instance deleted"),
            Err(e) if e.is_not_found() => {
                debug!(instance = %self.instance, "instance already deleted");
            }
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "cleanup failed to delete instance");
            }
        }
    }
}
