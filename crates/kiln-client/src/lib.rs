//! Client library for operation-based instance control planes.
//!
//! This crate provides:
//! - Authenticated HTTP transport (mutual-TLS or trust-token)
//! - Response envelope parsing with typed errors
//! - A poller that turns asynchronous operations into bounded waits
//! - [`ControlPlane`], the high-level trait the orchestrator drives
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ ControlPlane │───▶│    ApiClient     │───▶│  REST API    │
//! │   (trait)    │    │ (reqwest + auth) │    │ (operations) │
//! └──────────────┘    └──────────────────┘    └──────────────┘
//!        │                     ▲
//!        └──▶ OperationPoller ─┘
//! ```

pub mod control;
pub mod error;
pub mod http;
pub mod operation;
pub mod types;

pub use control::{ControlPlane, RestControlPlane};
pub use error::{ClientError, Result};
pub use http::{ApiClient, ClientConfig, Credentials};
pub use operation::{OperationPoller, OperationSource, DEFAULT_POLL_INTERVAL};
pub use types::{
    ClusterMember, CreateInstanceRequest, Envelope, ExecOutcome, ExecRequest, InstanceSource,
    Operation, OperationStatus, PowerAction, PublishRequest, ResponseKind, StateChange,
};
