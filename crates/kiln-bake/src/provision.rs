//! Provisioning: running commands and pushing files into the instance.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use kiln_client::{ControlPlane, ExecRequest};

use crate::config::TimeoutsConfig;
use crate::error::{BakeError, BakeResult};
use crate::manifest::{Manifest, Step, StepClass};

/// Runs manifest steps inside the instance, strictly in order.
pub struct Provisioner<'a> {
    plane: &'a dyn ControlPlane,
    instance: &'a str,
    timeouts: &'a TimeoutsConfig,
}

impl<'a> Provisioner<'a> {
    #[must_use]
    pub const fn new(
        plane: &'a dyn ControlPlane,
        instance: &'a str,
        timeouts: &'a TimeoutsConfig,
    ) -> Self {
        Self {
            plane,
            instance,
            timeouts,
        }
    }

    /// Apply every step of the manifest.
    pub async fn apply(&self, manifest: &Manifest) -> BakeResult<()> {
        let total = manifest.steps.len();
        for (index, step) in manifest.steps.iter().enumerate() {
            info!(
                instance = self.instance,
                step = index + 1,
                total,
                label = %step.label(),
                "provisioning step"
            );
            match step {
                Step::Run { argv, class, .. } => {
                    self.exec(argv, self.class_timeout(*class)).await?;
                }
                Step::File { source, dest, .. } => {
                    self.push(&manifest.resolve_source(source), dest).await?;
                }
            }
        }
        Ok(())
    }

    const fn class_timeout(&self, class: StepClass) -> Duration {
        match class {
            StepClass::Short => self.timeouts.short(),
            StepClass::Long => self.timeouts.long(),
        }
    }

    /// Run a command and require exit code 0.
    ///
    /// Non-zero exit raises [`BakeError::CommandFailed`] carrying the
    /// captured stdout/stderr, so the failure is diagnosable without
    /// re-entering the instance.
    pub async fn exec(&self, argv: &[String], wait: Duration) -> BakeResult<()> {
        let request = ExecRequest::new(argv.iter().cloned(), wait);
        let outcome = self.plane.exec(self.instance, &request).await?;

        if outcome.success() {
            return Ok(());
        }
        Err(BakeError::CommandFailed {
            command: argv.join(" "),
            exit_code: outcome.exit_code,
            stdout: outcome.stdout.unwrap_or_default(),
            stderr: outcome.stderr.unwrap_or_default(),
        })
    }

    /// Push a local file to `dest` inside the instance.
    ///
    /// Ensures the destination's parent directory exists first
    /// (`mkdir -p`, idempotent by construction), then writes the full
    /// content. No diffing: always an overwrite.
    pub async fn push(&self, local: &Path, dest: &str) -> BakeResult<()> {
        if let Some(parent) = parent_dir(dest) {
            let mkdir = vec!["mkdir".to_owned(), "-p".to_owned(), parent.to_owned()];
            self.exec(&mkdir, self.timeouts.short()).await?;
        }

        let content = std::fs::read(local).map_err(|e| {
            BakeError::Manifest(format!("cannot read file source {}: {e}", local.display()))
        })?;
        debug!(instance = self.instance, dest, bytes = content.len(), "pushing file");
        self.plane.push_file(self.instance, dest, content).await?;
        Ok(())
    }
}

/// Parent directory of a remote path, skipping the filesystem root.
fn parent_dir(dest: &str) -> Option<&str> {
    let (parent, _) = dest.rsplit_once('/')?;
    (!parent.is_empty()).then_some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_nested_path() {
        assert_eq!(parent_dir("/var/www/html/index.html"), Some("/var/www/html"));
    }

    #[test]
    fn parent_dir_of_root_level_file_is_skipped() {
        assert_eq!(parent_dir("/motd"), None);
    }

    #[test]
    fn parent_dir_without_slash() {
        assert_eq!(parent_dir("plain"), None);
    }
}
