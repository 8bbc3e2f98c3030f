//! MetricPipeline Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, FilterSpec, NamespaceSelector, OtlpOutput, TransformSpec, SYSTEM_NAMESPACES,
};

/// Specification for a MetricPipeline
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "MetricPipeline",
    plural = "metricpipelines",
    shortname = "mp",
    status = "MetricPipelineStatus",
    printcolumn = r#"{"name":"Configuration Generated","type":"string","jsonPath":".status.conditions[?(@.type==\"ConfigurationGenerated\")].status"}"#,
    printcolumn = r#"{"name":"Gateway Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"GatewayHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Agent Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"AgentHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Flow Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"TelemetryFlowHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineSpec {
    /// Metric sources
    #[serde(default)]
    pub input: MetricInput,

    /// Metric backend
    pub output: MetricOutput,

    /// User-defined OTTL transformations, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,

    /// User-defined OTTL drop conditions on data points, applied after the transforms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,
}

/// Metric sources; every input is independent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricInput {
    /// Scrape pods and services annotated with `prometheus.io/scrape=true`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusInput>,

    /// Kubelet and Kubernetes workload metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInput>,

    /// istio-proxy metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioInput>,

    /// Push-based OTLP metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<MetricOtlpInput>,
}

/// Prometheus scraping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusInput {
    /// Turn scraping on
    #[serde(default)]
    pub enabled: bool,

    /// Namespace selection; system namespaces are excluded unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    /// Keep scrape diagnostic metrics (`up`, `scrape_*`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_metrics: Option<DiagnosticMetrics>,
}

/// Runtime metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    /// Turn runtime metrics on
    #[serde(default)]
    pub enabled: bool,

    /// Namespace selection; system namespaces are excluded unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    /// Per resource kind toggles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<RuntimeResources>,
}

/// Toggle for one runtime resource kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceToggle {
    /// Collect metrics of this kind; defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Per resource kind toggles of the runtime input
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct RuntimeResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemonset: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statefulset: Option<ResourceToggle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<ResourceToggle>,
}

/// Runtime resource kinds with their own metric toggle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum RuntimeResource {
    Pod,
    Container,
    Node,
    Volume,
    Deployment,
    DaemonSet,
    StatefulSet,
    Job,
}

impl RuntimeResource {
    /// Every kind, in rendering order
    pub const ALL: [RuntimeResource; 8] = [
        Self::Pod,
        Self::Container,
        Self::Node,
        Self::Volume,
        Self::Deployment,
        Self::DaemonSet,
        Self::StatefulSet,
        Self::Job,
    ];

    /// Lowercase name used in processor names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Container => "container",
            Self::Node => "node",
            Self::Volume => "volume",
            Self::Deployment => "deployment",
            Self::DaemonSet => "daemonset",
            Self::StatefulSet => "statefulset",
            Self::Job => "job",
        }
    }
}

impl RuntimeResources {
    fn toggle(&self, resource: RuntimeResource) -> Option<&ResourceToggle> {
        match resource {
            RuntimeResource::Pod => self.pod.as_ref(),
            RuntimeResource::Container => self.container.as_ref(),
            RuntimeResource::Node => self.node.as_ref(),
            RuntimeResource::Volume => self.volume.as_ref(),
            RuntimeResource::Deployment => self.deployment.as_ref(),
            RuntimeResource::DaemonSet => self.daemonset.as_ref(),
            RuntimeResource::StatefulSet => self.statefulset.as_ref(),
            RuntimeResource::Job => self.job.as_ref(),
        }
    }
}

impl RuntimeInput {
    /// Whether metrics of `resource` are collected; kinds default to on
    pub fn resource_enabled(&self, resource: RuntimeResource) -> bool {
        self.resources
            .as_ref()
            .and_then(|r| r.toggle(resource))
            .and_then(|t| t.enabled)
            .unwrap_or(true)
    }
}

/// istio-proxy scraping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioInput {
    /// Turn scraping on
    #[serde(default)]
    pub enabled: bool,

    /// Namespace selection; all namespaces unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    /// Keep scrape diagnostic metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_metrics: Option<DiagnosticMetrics>,
}

/// OTLP push input
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricOtlpInput {
    /// Turn OTLP ingestion off
    #[serde(default)]
    pub disabled: bool,

    /// Namespace selection; all namespaces unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,
}

/// Diagnostic metric toggle
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticMetrics {
    /// Keep diagnostic metrics
    #[serde(default)]
    pub enabled: bool,
}

/// Metric backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricOutput {
    /// OTLP backend
    pub otlp: OtlpOutput,
}

/// Status of a MetricPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineStatus {
    /// Pipeline conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

fn excluding_system(selector: &Option<NamespaceSelector>) -> NamespaceSelector {
    selector
        .clone()
        .unwrap_or_else(|| NamespaceSelector::exclude(&SYSTEM_NAMESPACES))
}

fn all_namespaces(selector: &Option<NamespaceSelector>) -> NamespaceSelector {
    selector.clone().unwrap_or_default()
}

impl MetricInput {
    /// Prometheus input is on
    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus.as_ref().is_some_and(|p| p.enabled)
    }

    /// Runtime input is on
    pub fn runtime_enabled(&self) -> bool {
        self.runtime.as_ref().is_some_and(|r| r.enabled)
    }

    /// Istio input is on
    pub fn istio_enabled(&self) -> bool {
        self.istio.as_ref().is_some_and(|i| i.enabled)
    }

    /// OTLP input is on unless disabled
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp.as_ref().is_some_and(|o| o.disabled)
    }

    /// Some input needs the per-node metric agent
    pub fn needs_agent(&self) -> bool {
        self.prometheus_enabled() || self.runtime_enabled() || self.istio_enabled()
    }

    /// Effective namespace selector of the prometheus input
    pub fn prometheus_namespaces(&self) -> NamespaceSelector {
        excluding_system(&self.prometheus.as_ref().and_then(|p| p.namespaces.clone()))
    }

    /// Effective namespace selector of the runtime input
    pub fn runtime_namespaces(&self) -> NamespaceSelector {
        excluding_system(&self.runtime.as_ref().and_then(|r| r.namespaces.clone()))
    }

    /// Effective namespace selector of the istio input
    pub fn istio_namespaces(&self) -> NamespaceSelector {
        all_namespaces(&self.istio.as_ref().and_then(|i| i.namespaces.clone()))
    }

    /// Effective namespace selector of the otlp input
    pub fn otlp_namespaces(&self) -> NamespaceSelector {
        all_namespaces(&self.otlp.as_ref().and_then(|o| o.namespaces.clone()))
    }

    /// Diagnostic metrics kept for prometheus scraping
    pub fn prometheus_diagnostics(&self) -> bool {
        self.prometheus
            .as_ref()
            .and_then(|p| p.diagnostic_metrics.as_ref())
            .is_some_and(|d| d.enabled)
    }

    /// Diagnostic metrics kept for istio scraping
    pub fn istio_diagnostics(&self) -> bool {
        self.istio
            .as_ref()
            .and_then(|i| i.diagnostic_metrics.as_ref())
            .is_some_and(|d| d.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(input: serde_json::Value) -> MetricPipelineSpec {
        serde_json::from_value(serde_json::json!({
            "input": input,
            "output": {"otlp": {"endpoint": {"value": "http://backend:4317"}}}
        }))
        .unwrap()
    }

    #[test]
    fn otlp_only_pipeline_does_not_need_agent() {
        let spec = spec(serde_json::json!({}));
        assert!(spec.input.otlp_enabled());
        assert!(!spec.input.needs_agent());
    }

    #[test]
    fn runtime_input_needs_agent_and_excludes_system_namespaces() {
        let spec = spec(serde_json::json!({"runtime": {"enabled": true}}));
        assert!(spec.input.needs_agent());
        let ns = spec.input.runtime_namespaces();
        assert!(ns.exclude.contains(&"kube-system".to_string()));
        assert!(ns.include.is_empty());
    }

    #[test]
    fn runtime_resources_default_to_enabled() {
        let spec = spec(serde_json::json!({
            "runtime": {"enabled": true, "resources": {"node": {"enabled": false}}}
        }));
        let runtime = spec.input.runtime.unwrap();
        assert!(runtime.resource_enabled(RuntimeResource::Pod));
        assert!(!runtime.resource_enabled(RuntimeResource::Node));
    }

    #[test]
    fn explicit_selector_wins_over_system_default() {
        let spec = spec(serde_json::json!({
            "prometheus": {"enabled": true, "namespaces": {"include": ["ns1"]}}
        }));
        assert_eq!(spec.input.prometheus_namespaces(), NamespaceSelector::include(&["ns1"]));
        assert!(spec.input.istio_namespaces().is_empty());
    }
}
