//! Status computation for pipelines and the module
//!
//! - [`workload`]: health of Deployments and DaemonSets from their status and pods
//! - [`pipeline`]: per-pipeline condition list
//! - [`module`]: `<Signal>ComponentsHealthy` aggregate, state and endpoints

pub mod module;
pub mod pipeline;
pub mod workload;

pub use module::{module_status, ModuleObservation, PipelineSummary, SignalObservation};
pub use pipeline::{
    failure_conditions, merge_conditions, pipeline_conditions, timeout_conditions, AgentState,
    Backend, ConfigChecks, PipelineObservation, SecretCheck,
};
pub use workload::{daemon_set_health, deployment_health, pod_selector, WorkloadHealth};
