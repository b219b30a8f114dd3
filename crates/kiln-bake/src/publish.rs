//! Publishing the stopped instance as a named image.

use tracing::{info, warn};

use kiln_client::{ControlPlane, PublishRequest};

use crate::config::TimeoutsConfig;
use crate::error::{BakeError, BakeResult};

/// Publishes an image under an alias with last-publish-wins semantics.
///
/// At most one live fingerprint may own an alias, so an existing binding
/// is retired before the new image is published. The retire-then-publish
/// sequence is not atomic across concurrent runs targeting the same
/// alias; that race is a documented limitation, not handled here.
pub struct ImagePublisher<'a> {
    plane: &'a dyn ControlPlane,
    timeouts: &'a TimeoutsConfig,
}

impl<'a> ImagePublisher<'a> {
    #[must_use]
    pub const fn new(plane: &'a dyn ControlPlane, timeouts: &'a TimeoutsConfig) -> Self {
        Self { plane, timeouts }
    }

    /// Publish `instance` under `alias`, returning the new fingerprint.
    ///
    /// Three phases: retire any fingerprint currently bound to the alias
    /// (an unbound alias is not an error), publish from the stopped
    /// instance, then re-resolve the alias and confirm it points at the
    /// new fingerprint. A failed verification is reported as
    /// [`BakeError::PublishVerification`], distinct from a failed
    /// publish operation.
    pub async fn publish(
        &self,
        instance: &str,
        alias: &str,
        description: &str,
    ) -> BakeResult<String> {
        if let Some(old) = self.plane.resolve_alias(alias).await? {
            info!(alias, fingerprint = %old, "retiring existing image under alias");
            self.plane.delete_image(&old, self.timeouts.publish()).await?;
        }

        info!(instance, alias, "publishing image");
        let fingerprint = self
            .plane
            .publish_image(&PublishRequest {
                instance: instance.to_owned(),
                alias: alias.to_owned(),
                description: description.to_owned(),
                wait: self.timeouts.publish(),
            })
            .await?;

        match self.plane.resolve_alias(alias).await? {
            Some(bound) if bound == fingerprint => {
                info!(alias, %fingerprint, "alias verified");
                Ok(fingerprint)
            }
            Some(bound) => {
                warn!(alias, expected = %fingerprint, actual = %bound, "alias bound to unexpected fingerprint");
                Err(BakeError::PublishVerification {
                    alias: alias.to_owned(),
                })
            }
            None => Err(BakeError::PublishVerification {
                alias: alias.to_owned(),
            }),
        }
    }
}
