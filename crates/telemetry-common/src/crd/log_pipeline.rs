//! LogPipeline Custom Resource Definition
//!
//! A LogPipeline runs in one of two modes. With `output.otlp` it is served by
//! the OpenTelemetry log gateway and agent; with `output.http` or
//! `output.custom` it is rendered into the Fluent Bit DaemonSet.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, OtlpOutput, TransformSpec, ValueType};

/// Specification for a LogPipeline
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "LogPipeline",
    plural = "logpipelines",
    shortname = "lp",
    status = "LogPipelineStatus",
    printcolumn = r#"{"name":"Configuration Generated","type":"string","jsonPath":".status.conditions[?(@.type==\"ConfigurationGenerated\")].status"}"#,
    printcolumn = r#"{"name":"Agent Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"AgentHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Flow Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"TelemetryFlowHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Unsupported Mode","type":"boolean","jsonPath":".status.unsupportedMode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    /// Where logs are collected from
    #[serde(default)]
    pub input: LogInput,

    /// Custom Fluent Bit filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<LogFilter>,

    /// Where logs are shipped to
    #[serde(default)]
    pub output: LogOutput,

    /// Files mounted into the Fluent Bit container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileMount>,

    /// Secret values exposed to Fluent Bit as environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<VariableRef>,

    /// User-defined OTTL transformations; OTel mode only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,
}

/// Log inputs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogInput {
    /// Container logs tailed from the nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationInput>,

    /// OTLP push ingestion (OTel mode only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<LogOtlpInput>,
}

/// Application log tailing
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInput {
    /// Collect application logs; defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Namespace selection
    #[serde(default)]
    pub namespaces: InputNamespaces,

    /// Container selection
    #[serde(default)]
    pub containers: InputContainers,

    /// Keep all pod annotations as attributes
    #[serde(default)]
    pub keep_annotations: bool,

    /// Drop all pod labels
    #[serde(default)]
    pub drop_labels: bool,

    /// Keep the raw log line next to the parsed body; defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_original_body: Option<bool>,
}

impl ApplicationInput {
    /// Application input is on unless explicitly disabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Keep the original body unless explicitly disabled
    pub fn keeps_original_body(&self) -> bool {
        self.keep_original_body.unwrap_or(true)
    }
}

/// Namespace selection for application logs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputNamespaces {
    /// Only these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// All but these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Also collect from system namespaces
    #[serde(default)]
    pub system: bool,
}

/// Container selection for application logs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputContainers {
    /// Only these containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// All but these containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// OTLP push input of a log pipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogOtlpInput {
    /// Turn OTLP ingestion off
    #[serde(default)]
    pub disabled: bool,

    /// Namespace selection for OTLP logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<super::types::NamespaceSelector>,
}

/// Custom Fluent Bit filter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// Raw Fluent Bit filter definition, one `key value` pair per line
    #[serde(default)]
    pub custom: String,
}

/// Log output; exactly one variant must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogOutput {
    /// Raw Fluent Bit output definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,

    /// Fluent Bit HTTP output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOutput>,

    /// OTLP output served by the log gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpOutput>,

    /// Removed Grafana Loki output; always rejected
    #[serde(
        default,
        rename = "grafana-loki",
        skip_serializing_if = "Option::is_none"
    )]
    pub grafana_loki: Option<LokiOutput>,
}

impl LogOutput {
    /// Number of output variants set
    pub fn defined_count(&self) -> usize {
        [
            self.custom.as_deref().is_some_and(|c| !c.trim().is_empty()),
            self.http.as_ref().is_some_and(|h| h.host.is_defined()),
            self.otlp.is_some(),
            self.grafana_loki.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

/// Fluent Bit HTTP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpOutput {
    /// Target host
    #[serde(default)]
    pub host: ValueType,

    /// Basic auth user
    #[serde(default)]
    pub user: ValueType,

    /// Basic auth password
    #[serde(default)]
    pub password: ValueType,

    /// Request URI; must start with `/`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,

    /// Target port; 443 unless set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,

    /// Payload compression (e.g. `gzip`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compress: String,

    /// Payload format; `json` unless set
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// TLS options
    #[serde(default)]
    pub tls: HttpTls,

    /// Replace dots in attribute keys with underscores
    #[serde(default)]
    pub dedot: bool,
}

/// TLS settings of the Fluent Bit HTTP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTls {
    /// Disable TLS
    #[serde(default)]
    pub disabled: bool,

    /// Skip server certificate verification
    #[serde(default)]
    pub skip_certificate_validation: bool,

    /// PEM CA certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueType>,

    /// PEM client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ValueType>,

    /// PEM client key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueType>,
}

/// Shape of the removed Grafana Loki output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LokiOutput {
    /// Loki push URL
    #[serde(default)]
    pub url: ValueType,

    /// Static labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Keys removed before shipping
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_keys: Vec<String>,
}

/// File mounted into the Fluent Bit container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileMount {
    /// File name
    #[serde(default)]
    pub name: String,
    /// File content
    #[serde(default)]
    pub content: String,
}

/// Environment variable backed by a secret key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariableRef {
    /// Variable name
    #[serde(default)]
    pub name: String,
    /// Secret source
    #[serde(default)]
    pub value_from: super::types::ValueFromSource,
}

/// Status of a LogPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineStatus {
    /// Pipeline conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// True when custom filters or outputs are in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_mode: Option<bool>,
}

/// Backend serving a log pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogMode {
    /// OpenTelemetry log gateway and agent
    Otel,
    /// Fluent Bit DaemonSet
    FluentBit,
}

impl LogPipelineSpec {
    /// Mode selected by the output
    pub fn mode(&self) -> LogMode {
        if self.output.otlp.is_some() {
            LogMode::Otel
        } else {
            LogMode::FluentBit
        }
    }

    /// Custom filters or a custom output are in use
    pub fn is_unsupported_mode(&self) -> bool {
        !self.filters.is_empty() || self.output.custom.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Application input is present and enabled
    pub fn collects_application_logs(&self) -> bool {
        self.input
            .application
            .as_ref()
            .map_or(self.mode() == LogMode::FluentBit, |app| app.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn otlp_output_selects_otel_mode() {
        let spec: LogPipelineSpec = serde_json::from_value(serde_json::json!({
            "output": {"otlp": {"endpoint": {"value": "http://backend:4317"}}}
        }))
        .unwrap();
        assert_eq!(spec.mode(), LogMode::Otel);
        assert!(!spec.collects_application_logs());
    }

    #[test]
    fn http_output_selects_fluent_bit_mode() {
        let spec: LogPipelineSpec = serde_json::from_value(serde_json::json!({
            "input": {"application": {"namespaces": {"include": ["app"]}}},
            "output": {"http": {"host": {"value": "logs.example.com"}, "uri": "/ingest"}}
        }))
        .unwrap();
        assert_eq!(spec.mode(), LogMode::FluentBit);
        assert!(spec.collects_application_logs());
        assert_eq!(spec.output.defined_count(), 1);
    }

    #[test]
    fn loki_output_deserializes_from_dashed_key() {
        let spec: LogPipelineSpec = serde_json::from_value(serde_json::json!({
            "output": {"grafana-loki": {"url": {"value": "http://loki:3100"}}}
        }))
        .unwrap();
        assert!(spec.output.grafana_loki.is_some());
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = LogPipeline::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "telemetry.kyma-project.io");
    }

    #[test]
    fn custom_filter_marks_unsupported_mode() {
        let spec = LogPipelineSpec {
            filters: vec![LogFilter {
                custom: "Name grep\nRegex log aa".to_string(),
            }],
            ..Default::default()
        };
        assert!(spec.is_unsupported_mode());
    }
}
