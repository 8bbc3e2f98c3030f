//! OpenTelemetry Collector configuration
//!
//! Every gateway and agent configuration is assembled through a
//! [`ConfigBuilder`]: pipelines add the components they need by id, shared
//! receivers and processors are stored once, and each pipeline records its
//! component ids in order. Component bodies are plain JSON values; maps are
//! ordered so equal inputs render byte-identical YAML.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::crd::EnrichmentSpec;
use crate::signal::{HEALTH_CHECK_PORT, METRICS_PORT, OTLP_GRPC_PORT, OTLP_HTTP_PORT, PPROF_PORT};
use crate::Error;

pub mod exporter;
mod log;
mod metric;
pub mod ottl;
pub mod processors;
mod trace;

pub use log::{log_agent, log_agent_required, log_gateway, PIPELINE_ATTRIBUTE};
pub use metric::{metric_agent, metric_agent_required, metric_gateway};
pub use trace::trace_gateway;

/// Receiver id of the shared OTLP receiver
pub const OTLP_RECEIVER: &str = "otlp";

/// Inputs every collector renderer needs besides the pipelines
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    /// Namespace the collectors run in
    pub namespace: String,
    /// Module enrichment settings (pod labels, cluster name)
    pub enrichments: Option<EnrichmentSpec>,
}

impl RenderOptions {
    /// Options for collectors deployed to `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            enrichments: None,
        }
    }

    /// Attach module enrichments
    pub fn with_enrichments(mut self, enrichments: Option<EnrichmentSpec>) -> Self {
        self.enrichments = enrichments;
        self
    }

    pub(crate) fn cluster_name(&self) -> Option<&str> {
        self.enrichments
            .as_ref()
            .and_then(|e| e.cluster.as_ref())
            .map(|c| c.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

/// Component ids of one service pipeline
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Receiver ids
    pub receivers: Vec<String>,
    /// Processor ids, in execution order
    pub processors: Vec<String>,
    /// Exporter ids
    pub exporters: Vec<String>,
}

/// The `service` section
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ServiceConfig {
    /// Service pipelines by id (`traces/<name>`)
    pub pipelines: BTreeMap<String, PipelineConfig>,
    /// Collector self-telemetry
    pub telemetry: Value,
    /// Enabled extensions
    pub extensions: Vec<String>,
}

/// A complete collector configuration document
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CollectorConfig {
    /// Extensions by id
    pub extensions: BTreeMap<String, Value>,
    /// Receivers by id
    pub receivers: BTreeMap<String, Value>,
    /// Processors by id
    pub processors: BTreeMap<String, Value>,
    /// Exporters by id
    pub exporters: BTreeMap<String, Value>,
    /// Service wiring
    pub service: ServiceConfig,
}

impl CollectorConfig {
    /// Serialize to the YAML document the collector reads
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("CollectorConfig", e.to_string()))
    }

    /// Service pipeline by id
    pub fn pipeline(&self, id: &str) -> Option<&PipelineConfig> {
        self.service.pipelines.get(id)
    }
}

/// Incremental collector configuration assembly
#[derive(Debug)]
pub struct ConfigBuilder {
    config: CollectorConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Builder seeded with health check, pprof and self-telemetry settings
    pub fn new() -> Self {
        let extensions = BTreeMap::from([
            (
                "health_check".to_string(),
                json!({ "endpoint": format!("${{MY_POD_IP}}:{}", HEALTH_CHECK_PORT) }),
            ),
            (
                "pprof".to_string(),
                json!({ "endpoint": format!("127.0.0.1:{}", PPROF_PORT) }),
            ),
        ]);
        let service = ServiceConfig {
            pipelines: BTreeMap::new(),
            telemetry: json!({
                "metrics": {
                    "readers": [{
                        "pull": {
                            "exporter": {
                                "prometheus": {
                                    "host": "${MY_POD_IP}",
                                    "port": METRICS_PORT,
                                }
                            }
                        }
                    }]
                },
                "logs": { "level": "info", "encoding": "json" },
            }),
            extensions: vec!["health_check".to_string(), "pprof".to_string()],
        };
        Self {
            config: CollectorConfig {
                extensions,
                service,
                ..Default::default()
            },
        }
    }

    fn pipeline_mut(&mut self, pipeline: &str) -> &mut PipelineConfig {
        self.config
            .service
            .pipelines
            .entry(pipeline.to_string())
            .or_default()
    }

    /// Enable an extension
    pub fn add_extension(&mut self, id: &str, body: Value) -> &mut Self {
        self.config.extensions.insert(id.to_string(), body);
        push_unique(&mut self.config.service.extensions, id);
        self
    }

    /// Add receiver `id` to `pipeline`; the body is built only on first use
    pub fn add_receiver(&mut self, pipeline: &str, id: &str, body: impl FnOnce() -> Value) -> &mut Self {
        self.config
            .receivers
            .entry(id.to_string())
            .or_insert_with(body);
        push_unique(&mut self.pipeline_mut(pipeline).receivers, id);
        self
    }

    /// Add processor `id` to the end of `pipeline`'s chain; the body is built
    /// only on first use
    pub fn add_processor(&mut self, pipeline: &str, id: &str, body: impl FnOnce() -> Value) -> &mut Self {
        self.config
            .processors
            .entry(id.to_string())
            .or_insert_with(body);
        push_unique(&mut self.pipeline_mut(pipeline).processors, id);
        self
    }

    /// Add exporter `id` to `pipeline`
    pub fn add_exporter(&mut self, pipeline: &str, id: &str, body: Value) -> &mut Self {
        self.config.exporters.insert(id.to_string(), body);
        push_unique(&mut self.pipeline_mut(pipeline).exporters, id);
        self
    }

    /// Finish the document
    pub fn build(self) -> CollectorConfig {
        self.config
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

/// Shared OTLP receiver listening on the pod IP
pub fn otlp_receiver() -> Value {
    json!({
        "protocols": {
            "grpc": { "endpoint": format!("${{MY_POD_IP}}:{}", OTLP_GRPC_PORT) },
            "http": { "endpoint": format!("${{MY_POD_IP}}:{}", OTLP_HTTP_PORT) },
        }
    })
}

/// Service pipeline id of a pipeline resource (`traces/<name>`)
pub fn pipeline_id(data_type: &str, name: &str) -> String {
    format!("{}/{}", data_type, name)
}
