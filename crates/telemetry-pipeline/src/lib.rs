//! Reconciliation core for telemetry pipelines
//!
//! This crate turns LogPipeline, MetricPipeline and TracePipeline resources
//! into shared collector workloads and reports their health:
//!
//! - **Validation**: admission and reconcile-time checks of pipeline specs
//! - **TLS**: classification of configured certificates and keys
//! - **Secrets**: resolution of secret-backed values and the secret watch set
//! - **Render**: collector and Fluent Bit configuration plus environment bindings
//! - **Resources**: Deployments, DaemonSets, RBAC, Services and NetworkPolicies
//! - **Status**: per-pipeline conditions and the module aggregate
//! - **Self-monitor**: alert store feeding the flow-health condition
//! - **Controller**: per-signal reconcilers and the module reconciler

pub mod conditions;
pub mod config;
pub mod controller;
pub mod lock;
pub mod render;
pub mod resources;
pub mod secrets;
pub mod selfmon;
pub mod signal;
pub mod status;
pub mod tls;
pub mod validation;

pub use config::ReconcilerConfig;
pub use signal::Signal;

// Bridge telemetry_common types into this crate's namespace.
pub(crate) use telemetry_common::{crd, Error};
