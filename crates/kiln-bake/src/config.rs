//! Configuration for the bake pipeline.
//!
//! Built once at startup from `kiln.toml` plus a `KILN_`-prefixed
//! environment overlay, then passed by reference through every
//! component. Nothing else reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use kiln_client::{ClientConfig, Credentials};

use crate::error::{BakeError, BakeResult};

/// Top-level configuration for a bake run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BakeConfig {
    /// Control-plane API connection.
    #[serde(default)]
    pub api: ApiConfig,

    /// Placement target selection.
    #[serde(default)]
    pub placement: PlacementConfig,

    /// Ephemeral instance settings.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Provisioning payload.
    #[serde(default)]
    pub provision: ProvisionConfig,

    /// Published image settings.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Per-step-class timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl BakeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Later sources override earlier: defaults, then the file, then
    /// `KILN_`-prefixed environment variables.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> BakeResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KILN_").split("__"))
            .extract()
            .map_err(|e| BakeError::Config(e.to_string()))
    }

    /// Check the inputs that must be present before any remote call.
    pub fn validate(&self) -> BakeResult<()> {
        if self.api.host.is_empty() {
            return Err(BakeError::Config("api.host is required".to_owned()));
        }
        self.api.credentials()?;
        if self.placement.group.is_empty() {
            return Err(BakeError::Config(
                "placement.group is required".to_owned(),
            ));
        }
        if self.instance.source_alias.is_empty() {
            return Err(BakeError::Config(
                "instance.source_alias is required".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Control-plane API connection settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiConfig {
    /// Control-plane host name or address.
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Verify the server TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// PEM client certificate for mutual TLS.
    pub client_cert: Option<PathBuf>,

    /// PEM client key for mutual TLS.
    pub client_key: Option<PathBuf>,

    /// Trust token, the alternative to certificate auth.
    pub token: Option<String>,
}

impl ApiConfig {
    /// Resolve the configured authentication strategy.
    ///
    /// Exactly one strategy must be configured: a certificate/key pair,
    /// or a trust token.
    pub fn credentials(&self) -> BakeResult<Credentials> {
        match (&self.client_cert, &self.client_key, &self.token) {
            (Some(cert), Some(key), None) => Ok(Credentials::ClientCertificate {
                cert: cert.clone(),
                key: key.clone(),
            }),
            (None, None, Some(token)) => Ok(Credentials::TrustToken {
                token: token.clone(),
            }),
            (None, None, None) => Err(BakeError::Config(
                "no credential configured: set api.client_cert/api.client_key or api.token"
                    .to_owned(),
            )),
            (Some(_), None, _) | (None, Some(_), _) => Err(BakeError::Config(
                "api.client_cert and api.client_key must be set together".to_owned(),
            )),
            (Some(_), Some(_), Some(_)) => Err(BakeError::Config(
                "configure either certificate auth or a trust token, not both".to_owned(),
            )),
        }
    }

    /// Build the client connection settings.
    pub fn client_config(&self) -> BakeResult<ClientConfig> {
        Ok(ClientConfig {
            host: self.host.clone(),
            port: self.port,
            verify_tls: self.verify_tls,
            credentials: self.credentials()?,
        })
    }
}

const fn default_api_port() -> u16 {
    8443
}

const fn default_true() -> bool {
    true
}

/// Placement target selection.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlacementConfig {
    /// Cluster group a member must belong to. Selection fails closed
    /// when no member matches.
    #[serde(default)]
    pub group: String,
}

/// Ephemeral instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Alias of the base image the instance is created from.
    #[serde(default)]
    pub source_alias: String,

    /// Remote image server, when the base image is not local.
    pub source_server: Option<String>,

    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Grace delay after start before probing guest readiness.
    #[serde(default = "default_ready_grace_secs")]
    pub ready_grace_secs: u64,

    /// Budget for the guest to answer the readiness probe.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Command probed until it exits 0, signalling the guest is
    /// serviceable. The orchestrator has no other visibility into guest
    /// readiness.
    #[serde(default = "default_ready_command")]
    pub ready_command: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            source_alias: String::new(),
            source_server: None,
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            ready_grace_secs: default_ready_grace_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            ready_command: default_ready_command(),
        }
    }
}

impl InstanceConfig {
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    #[must_use]
    pub const fn ready_grace(&self) -> Duration {
        Duration::from_secs(self.ready_grace_secs)
    }

    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

const fn default_start_timeout_secs() -> u64 {
    60
}

const fn default_stop_timeout_secs() -> u64 {
    60
}

const fn default_ready_grace_secs() -> u64 {
    5
}

const fn default_ready_timeout_secs() -> u64 {
    120
}

fn default_ready_command() -> Vec<String> {
    vec!["/bin/true".to_owned()]
}

/// Provisioning payload settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// Path to the provisioning manifest.
    #[serde(default = "default_manifest_path")]
    pub manifest: PathBuf,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest_path(),
        }
    }
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("kiln-manifest.toml")
}

/// Published image settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Description attached to the published image.
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            description: default_description(),
        }
    }
}

fn default_description() -> String {
    "Built by kiln".to_owned()
}

/// Timeouts per step class.
///
/// Short administrative commands and long package operations get
/// distinct budgets rather than one global timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_short_secs")]
    pub short_secs: u64,

    #[serde(default = "default_long_secs")]
    pub long_secs: u64,

    /// Budget for instance create (may include an image download).
    #[serde(default = "default_create_secs")]
    pub create_secs: u64,

    /// Budget for image publish and deletion waits.
    #[serde(default = "default_publish_secs")]
    pub publish_secs: u64,

    /// Budget for instance deletion.
    #[serde(default = "default_delete_secs")]
    pub delete_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            short_secs: default_short_secs(),
            long_secs: default_long_secs(),
            create_secs: default_create_secs(),
            publish_secs: default_publish_secs(),
            delete_secs: default_delete_secs(),
        }
    }
}

impl TimeoutsConfig {
    #[must_use]
    pub const fn short(&self) -> Duration {
        Duration::from_secs(self.short_secs)
    }

    #[must_use]
    pub const fn long(&self) -> Duration {
        Duration::from_secs(self.long_secs)
    }

    #[must_use]
    pub const fn create(&self) -> Duration {
        Duration::from_secs(self.create_secs)
    }

    #[must_use]
    pub const fn publish(&self) -> Duration {
        Duration::from_secs(self.publish_secs)
    }

    #[must_use]
    pub const fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }
}

const fn default_short_secs() -> u64 {
    60
}

const fn default_long_secs() -> u64 {
    600
}

const fn default_create_secs() -> u64 {
    300
}

const fn default_publish_secs() -> u64 {
    300
}

const fn default_delete_secs() -> u64 {
    120
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid_toml() -> &'static str {
        r#"
            [api]
            host = "plane.example"
            token = "tok"

            [placement]
            group = "builders"

            [instance]
            source_alias = "ubuntu/22.04"
        "#
    }

    #[test]
    fn parse_minimal_config() {
        let config: BakeConfig = toml::from_str(valid_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.api.port, 8443);
        assert!(config.api.verify_tls);
        assert_eq!(config.timeouts.long(), Duration::from_secs(600));
        assert_eq!(config.instance.ready_command, vec!["/bin/true"]);
    }

    #[test]
    fn missing_host_fails_validation() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                token = "tok"
                [placement]
                group = "builders"
                [instance]
                source_alias = "ubuntu/22.04"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BakeError::Config(_)));
    }

    #[test]
    fn missing_credentials_fails_validation() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                host = "plane.example"
                [placement]
                group = "builders"
                [instance]
                source_alias = "ubuntu/22.04"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                host = "plane.example"
                client_cert = "/etc/kiln/client.crt"
            "#,
        )
        .unwrap();
        assert!(config.api.credentials().is_err());
    }

    #[test]
    fn both_strategies_at_once_are_rejected() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                host = "plane.example"
                client_cert = "/etc/kiln/client.crt"
                client_key = "/etc/kiln/client.key"
                token = "tok"
            "#,
        )
        .unwrap();
        assert!(config.api.credentials().is_err());
    }

    #[test]
    fn certificate_credentials_resolve() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                host = "plane.example"
                client_cert = "/etc/kiln/client.crt"
                client_key = "/etc/kiln/client.key"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.api.credentials().unwrap(),
            Credentials::ClientCertificate { .. }
        ));
    }

    #[test]
    fn missing_group_fails_validation() {
        let config: BakeConfig = toml::from_str(
            r#"
                [api]
                host = "plane.example"
                token = "tok"
                [instance]
                source_alias = "ubuntu/22.04"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
