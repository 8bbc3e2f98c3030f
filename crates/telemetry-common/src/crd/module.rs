//! Telemetry module Custom Resource Definition
//!
//! One `Telemetry` object per cluster configures the shared gateways and
//! reports the aggregated health of every pipeline.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for the Telemetry module
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.kyma-project.io",
    version = "v1alpha1",
    kind = "Telemetry",
    plural = "telemetries",
    namespaced,
    status = "TelemetryStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySpec {
    /// Trace gateway settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<SignalSpec>,

    /// Metric gateway settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<SignalSpec>,

    /// Log gateway settings and enrichments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogSignalSpec>,

    /// Enrichments applied to every signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichments: Option<EnrichmentSpec>,
}

/// Gateway settings of the trace and metric signals
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalSpec {
    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewaySpec,
}

/// Log signal settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogSignalSpec {
    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewaySpec,

    /// Log enrichments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichments: Option<EnrichmentSpec>,
}

/// Gateway settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Replica scaling
    #[serde(default)]
    pub scaling: Scaling,
}

/// Gateway replica scaling
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scaling {
    /// Strategy; Dynamic unless set
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<ScalingStrategy>,

    /// Settings of the Static strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#static: Option<StaticScaling>,
}

/// Gateway scaling strategy
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ScalingStrategy {
    /// Fixed replica count
    Static,
    /// Replicas follow the number of pipelines
    #[default]
    Dynamic,
}

/// Fixed gateway replica count
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticScaling {
    /// Replica count
    #[schemars(range(min = 0))]
    pub replicas: i32,
}

/// Enrichment settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentSpec {
    /// Pod labels copied onto resource attributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract_pod_labels: Vec<PodLabel>,

    /// Cluster name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterName>,
}

/// Pod label selector; exactly one of `key` or `keyPrefix`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodLabel {
    /// Exact label key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Label key prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

/// Cluster name used in the `k8s.cluster.name` attribute
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterName {
    /// Name
    pub name: String,
}

/// Module state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ModuleState {
    /// Every signal is healthy
    Ready,
    /// Some signal needs attention
    #[default]
    Warning,
    /// The module is being removed
    Deleting,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Warning => write!(f, "Warning"),
            Self::Deleting => write!(f, "Deleting"),
        }
    }
}

/// OTLP push endpoints of one signal
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtlpEndpoints {
    /// gRPC endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub grpc: String,

    /// HTTP endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http: String,
}

/// OTLP endpoints of every running gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEndpoints {
    /// Log gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<OtlpEndpoints>,

    /// Trace gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traces: Option<OtlpEndpoints>,

    /// Metric gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<OtlpEndpoints>,
}

/// Status of the Telemetry module
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStatus {
    /// Overall state
    #[serde(default)]
    pub state: ModuleState,

    /// One `<Signal>ComponentsHealthy` condition per signal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// OTLP push endpoints
    #[serde(default)]
    pub endpoints: GatewayEndpoints,
}

impl TelemetrySpec {
    /// Scaling of the trace gateway
    pub fn trace_scaling(&self) -> Option<&Scaling> {
        self.trace.as_ref().map(|t| &t.gateway.scaling)
    }

    /// Scaling of the metric gateway
    pub fn metric_scaling(&self) -> Option<&Scaling> {
        self.metric.as_ref().map(|m| &m.gateway.scaling)
    }

    /// Scaling of the log gateway
    pub fn log_scaling(&self) -> Option<&Scaling> {
        self.log.as_ref().map(|l| &l.gateway.scaling)
    }

    /// Enrichments in effect; the log section wins over the top-level one
    pub fn enrichments(&self) -> Option<&EnrichmentSpec> {
        self.log
            .as_ref()
            .and_then(|l| l.enrichments.as_ref())
            .or(self.enrichments.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn static_scaling_parses_from_yaml() {
        let spec: TelemetrySpec = serde_yaml::from_str(
            r#"
metric:
  gateway:
    scaling:
      type: Static
      static:
        replicas: 4
log:
  enrichments:
    extractPodLabels:
      - key: app
      - keyPrefix: team.
"#,
        )
        .unwrap();
        let scaling = spec.metric_scaling().unwrap();
        assert_eq!(scaling.type_, Some(ScalingStrategy::Static));
        assert_eq!(scaling.r#static.as_ref().map(|s| s.replicas), Some(4));
        assert_eq!(spec.enrichments().unwrap().extract_pod_labels.len(), 2);
        assert!(spec.trace_scaling().is_none());
    }

    #[test]
    fn crd_is_namespaced_under_operator_group() {
        let crd = Telemetry::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.group, "operator.kyma-project.io");
    }

    #[test]
    fn status_state_serializes_as_string() {
        let status = TelemetryStatus {
            state: ModuleState::Ready,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Ready");
    }
}
