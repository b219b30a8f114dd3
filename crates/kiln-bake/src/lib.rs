//! Image-bake orchestrator.
//!
//! Provisions a disposable instance from a control plane, configures it
//! from a manifest of commands and files, freezes the result into a
//! named image, and guarantees the instance is removed on every exit
//! path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ selector │──▶│ lifecycle │──▶│ provisioner  │──▶│ publisher │
//! └──────────┘   └───────────┘   └──────────────┘   └───────────┘
//!                      ▲                                   │
//!                      └──────── cleanup guard ◀───────────┘
//! ```
//!
//! The control plane is behind the [`kiln_client::ControlPlane`] trait;
//! tests drive the whole pipeline against a recording mock.

pub mod config;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod manifest;
pub mod pipeline;
pub mod provision;
pub mod publish;
pub mod selector;

pub use config::BakeConfig;
pub use error::{BakeError, BakeResult};
pub use guard::CleanupGuard;
pub use lifecycle::{run_instance_name, InstanceLifecycle};
pub use manifest::{Manifest, Step, StepClass};
pub use pipeline::{run, BakeOutcome};
pub use provision::Provisioner;
pub use publish::ImagePublisher;
pub use selector::select_member;

/// Whether a string is a valid artifact alias.
///
/// Aliases are restricted to alphanumerics, hyphen and underscore so
/// they are safe in API paths and generated instance names.
#[must_use]
pub fn valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
