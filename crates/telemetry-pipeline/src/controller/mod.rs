//! Reconcilers for the pipeline kinds and the Telemetry module
//!
//! All three pipeline kinds share one generic [`reconcile`]; what differs per
//! kind (validation, secret references, rendering, status) lives behind the
//! traits in [`pipeline`].

pub mod client;
pub mod context;
pub mod module;
pub mod pipeline;
pub mod reconcile;

pub use client::{TelemetryKubeClient, TelemetryKubeClientImpl, MODULE_FINALIZER};
pub use context::PipelineContext;
pub use module::{error_policy_module, reconcile_module};
pub use pipeline::{
    AggregateStatus, ComponentPlan, OwnedObjects, PipelineResource, Render, RenderInputs,
    ResolveSecrets, TelemetryPipeline, Validate,
};
pub use reconcile::{error_policy, reconcile};
