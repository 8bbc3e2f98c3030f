//! Telemetry manager: pipeline controllers, admission webhook and self-monitor receiver

#![deny(missing_docs)]

/// Operator settings from flags and environment
pub mod config;
/// Controller construction for every watched kind
pub mod controller_runner;
/// CRD generation and installation
pub mod crds;
/// Self-monitor alert receiver
pub mod selfmon;
/// Validating admission webhook
pub mod webhook;

pub use config::{ControllerArgs, OperatorConfig};
