//! Custom Resource Definitions for the telemetry operator

mod log_parser;
mod log_pipeline;
mod metric_pipeline;
mod module;
mod trace_pipeline;
mod types;

pub use log_parser::{LogParser, LogParserSpec, LogParserStatus};
pub use log_pipeline::{
    ApplicationInput, FileMount, HttpOutput, HttpTls, InputContainers, InputNamespaces, LogFilter,
    LogInput, LogMode, LogOtlpInput, LogOutput, LogPipeline, LogPipelineSpec, LogPipelineStatus,
    LokiOutput, VariableRef,
};
pub use metric_pipeline::{
    DiagnosticMetrics, IstioInput, MetricInput, MetricOtlpInput, MetricOutput, MetricPipeline,
    MetricPipelineSpec, MetricPipelineStatus, PrometheusInput, ResourceToggle, RuntimeInput,
    RuntimeResource, RuntimeResources,
};
pub use module::{
    ClusterName, EnrichmentSpec, GatewayEndpoints, GatewaySpec, LogSignalSpec, ModuleState,
    OtlpEndpoints, PodLabel, Scaling, ScalingStrategy, SignalSpec, StaticScaling, Telemetry,
    TelemetrySpec, TelemetryStatus,
};
pub use trace_pipeline::{TracePipeline, TracePipelineSpec, TracePipelineStatus, TraceOutput};
pub use types::{
    find_condition, Authentication, BasicAuth, Condition, ConditionStatus, FilterSpec, Header,
    NamespaceSelector, OtlpOutput, OtlpProtocol, OtlpTls, SecretKeyRef, TransformSpec,
    ValueFromSource, ValueType, SYSTEM_NAMESPACES,
};
