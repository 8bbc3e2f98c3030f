//! Processor bodies shared by the gateway and agent configurations

use serde_json::{json, Value};

use super::ottl::{self, SCOPE_ISTIO, SCOPE_PROMETHEUS, SCOPE_RUNTIME};
use crate::crd::{EnrichmentSpec, FilterSpec, TransformSpec};
use crate::signal::Signal;

pub const MEMORY_LIMITER: &str = "memory_limiter";
pub const BATCH: &str = "batch";
pub const K8S_ATTRIBUTES: &str = "k8sattributes";
pub const INSERT_CLUSTER_NAME: &str = "resource/insert-cluster-name";
pub const SERVICE_ENRICHMENT: &str = "service_enrichment";
pub const DROP_KYMA_ATTRIBUTES: &str = "resource/drop-kyma-attributes";
pub const ISTIO_NOISE_FILTER: &str = "istio_noise_filter";
pub const DROP_NOISY_SPANS: &str = "filter/drop-noisy-spans";

/// Fallback cluster name resolved by the collector from its environment
pub const DEFAULT_CLUSTER_NAME: &str = "${KUBERNETES_SERVICE_HOST}";

const KYMA_K8S_IO_APP_NAME: &str = "kyma.kubernetes_io_app_name";
const KYMA_APP_NAME: &str = "kyma.app_name";

/// Batch size of every exporting pipeline
pub const BATCH_SIZE: u32 = 512;

pub fn memory_limiter() -> Value {
    json!({
        "check_interval": "1s",
        "limit_percentage": 75,
        "spike_limit_percentage": 15,
    })
}

pub fn batch() -> Value {
    json!({
        "send_batch_size": BATCH_SIZE,
        "timeout": "10s",
        "send_batch_max_size": BATCH_SIZE,
    })
}

/// Kubernetes metadata enrichment.
///
/// Pod-label rules from the module become extra `labels` entries: an exact
/// key keeps its name under `k8s.pod.label.`, a prefix captures the whole
/// matched key through the regex group.
pub fn k8s_attributes(enrichments: Option<&EnrichmentSpec>) -> Value {
    let mut labels = vec![
        json!({"from": "pod", "key": "app.kubernetes.io/name", "tag_name": KYMA_K8S_IO_APP_NAME}),
        json!({"from": "pod", "key": "app", "tag_name": KYMA_APP_NAME}),
        json!({"from": "node", "key": "topology.kubernetes.io/region", "tag_name": "cloud.region"}),
        json!({"from": "node", "key": "topology.kubernetes.io/zone", "tag_name": "cloud.availability_zone"}),
        json!({"from": "node", "key": "node.kubernetes.io/instance-type", "tag_name": "host.type"}),
        json!({"from": "node", "key": "kubernetes.io/arch", "tag_name": "host.arch"}),
    ];

    for label in enrichments.into_iter().flat_map(|e| &e.extract_pod_labels) {
        let prefix = label.key_prefix.as_deref().filter(|p| !p.is_empty());
        let key = label.key.as_deref().filter(|k| !k.is_empty());
        match (prefix, key) {
            (Some(prefix), _) => labels.push(json!({
                "from": "pod",
                "key_regex": format!("({}.*)", prefix),
                "tag_name": "k8s.pod.label.$$1",
            })),
            (None, Some(key)) => labels.push(json!({
                "from": "pod",
                "key": key,
                "tag_name": format!("k8s.pod.label.{}", key),
            })),
            (None, None) => {}
        }
    }

    json!({
        "auth_type": "serviceAccount",
        "passthrough": false,
        "extract": {
            "metadata": [
                "k8s.pod.name",
                "k8s.node.name",
                "k8s.namespace.name",
                "k8s.deployment.name",
                "k8s.statefulset.name",
                "k8s.daemonset.name",
                "k8s.cronjob.name",
                "k8s.job.name",
            ],
            "labels": labels,
        },
        "pod_association": [
            {"sources": [{"from": "resource_attribute", "name": "k8s.pod.ip"}]},
            {"sources": [{"from": "resource_attribute", "name": "k8s.pod.uid"}]},
            {"sources": [{"from": "connection"}]},
        ],
    })
}

pub fn insert_cluster_name(cluster_name: Option<&str>) -> Value {
    json!({
        "attributes": [{
            "action": "insert",
            "key": "k8s.cluster.name",
            "value": cluster_name.unwrap_or(DEFAULT_CLUSTER_NAME),
        }]
    })
}

pub fn service_enrichment() -> Value {
    json!({ "resource_attributes": [KYMA_K8S_IO_APP_NAME, KYMA_APP_NAME] })
}

pub fn drop_kyma_attributes() -> Value {
    json!({ "attributes": [{ "action": "delete", "pattern": "kyma.*" }] })
}

pub fn istio_noise_filter() -> Value {
    json!({})
}

fn proxy_span(method: &str, operation: &str) -> String {
    ottl::join_and(&[
        ottl::parenthesize(&ottl::attribute_equals("http.method", method)),
        ottl::parenthesize(&ottl::attribute_equals("component", "proxy")),
        ottl::parenthesize(&ottl::attribute_equals("OperationName", operation)),
    ])
}

fn with_service(base: &str, service: &str) -> String {
    format!(
        "{} and ({})",
        base,
        ottl::resource_attribute_equals("service.name", service)
    )
}

fn with_url(base: &str, regex: &str) -> String {
    format!(
        "{} and ({} == true)",
        base,
        ottl::is_match(&ottl::attribute("http.url"), regex)
    )
}

fn in_kyma_system(base: &str) -> String {
    format!(
        "{} and ({})",
        base,
        ottl::resource_attribute_equals(ottl::NAMESPACE_ATTRIBUTE, "kyma-system")
    )
}

/// Drop conditions for spans produced by platform-internal traffic
pub fn noisy_span_conditions() -> Vec<String> {
    let post_ingress = proxy_span("POST", "Ingress");
    let post_egress = proxy_span("POST", "Egress");
    let get_ingress = proxy_span("GET", "Ingress");
    let get_egress = proxy_span("GET", "Egress");

    vec![
        with_service(&post_ingress, "jaeger.kyma-system"),
        with_service(&get_egress, "grafana.kyma-system"),
        with_service(&get_ingress, "jaeger.kyma-system"),
        with_service(&get_ingress, "grafana.kyma-system"),
        with_service(&get_ingress, "loki.kyma-system"),
        in_kyma_system(&with_url(&get_ingress, ".+/metrics")),
        in_kyma_system(&with_url(&get_ingress, ".+/healthz(/.*)?")),
        format!(
            "{} and ({})",
            get_ingress,
            ottl::attribute_equals("user_agent", "vm_promscrape")
        ),
        with_url(
            &post_egress,
            r"http(s)?:\\/\\/telemetry-otlp-traces\\.kyma-system(\\..*)?:(4318|4317).*",
        ),
        with_url(
            &post_egress,
            r"http(s)?:\\/\\/telemetry-trace-collector-internal\\.kyma-system(\\..*)?:(55678).*",
        ),
        with_service(&post_ingress, "loki.kyma-system"),
        with_service(&post_egress, "telemetry-fluent-bit.kyma-system"),
    ]
}

pub fn drop_noisy_spans() -> Value {
    filter_spans(noisy_span_conditions())
}

/// Filter processor dropping spans matching any condition
pub fn filter_spans(conditions: Vec<String>) -> Value {
    json!({ "error_mode": "ignore", "traces": { "span": conditions } })
}

/// Filter processor dropping metrics matching any condition
pub fn filter_metrics(conditions: Vec<String>) -> Value {
    json!({ "error_mode": "ignore", "metrics": { "metric": conditions } })
}

/// Filter processor dropping log records matching any condition
pub fn filter_logs(conditions: Vec<String>) -> Value {
    json!({ "error_mode": "ignore", "logs": { "log_record": conditions } })
}

/// Transform and filter processors built from a pipeline's OTTL, transform first
///
/// Either one is left out when the pipeline defines none.
pub fn user_defined(
    signal: Signal,
    pipeline: &str,
    transforms: &[TransformSpec],
    filters: &[FilterSpec],
) -> Vec<(String, Value)> {
    let mut processors = Vec::new();
    if !transforms.is_empty() {
        let key = match signal {
            Signal::Logs => "log_statements",
            Signal::Metrics => "metric_statements",
            Signal::Traces => "trace_statements",
        };
        let statements: Vec<Value> = transforms
            .iter()
            .map(|t| {
                let mut group = json!({ "statements": t.statements });
                if !t.conditions.is_empty() {
                    group["conditions"] = json!(t.conditions);
                }
                group
            })
            .collect();
        let mut body = json!({ "error_mode": "ignore" });
        body[key] = Value::Array(statements);
        processors.push((format!("transform/user-defined-{}", pipeline), body));
    }

    let conditions: Vec<String> = filters.iter().flat_map(|f| f.conditions.iter().cloned()).collect();
    if !conditions.is_empty() {
        let body = match signal {
            Signal::Logs => filter_logs(conditions),
            Signal::Metrics => json!({ "error_mode": "ignore", "metrics": { "datapoint": conditions } }),
            Signal::Traces => filter_spans(conditions),
        };
        processors.push((format!("filter/user-defined-{}", pipeline), body));
    }
    processors
}

/// Upstream scope names rewritten by the agent
pub const KUBELETSTATS_SCOPE: &str =
    "github.com/open-telemetry/opentelemetry-collector-contrib/receiver/kubeletstatsreceiver";
pub const PROMETHEUS_SCOPE: &str =
    "github.com/open-telemetry/opentelemetry-collector-contrib/receiver/prometheusreceiver";

/// Agent inputs that stamp their own instrumentation scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentInput {
    Runtime,
    Prometheus,
    Istio,
}

impl AgentInput {
    pub fn scope(&self) -> &'static str {
        match self {
            Self::Runtime => SCOPE_RUNTIME,
            Self::Prometheus => SCOPE_PROMETHEUS,
            Self::Istio => SCOPE_ISTIO,
        }
    }

    fn upstream_scope(&self) -> &'static str {
        match self {
            Self::Runtime => KUBELETSTATS_SCOPE,
            Self::Prometheus | Self::Istio => PROMETHEUS_SCOPE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Prometheus => "prometheus",
            Self::Istio => "istio",
        }
    }
}

/// Transform stamping the input's instrumentation scope on its metrics
pub fn set_instrumentation_scope(input: AgentInput, version: &str) -> Value {
    let mut statements = vec![json!({
        "statements": [
            format!(
                "set(scope.version, \"{}\") where scope.name == \"{}\"",
                version,
                input.upstream_scope()
            ),
            format!(
                "set(scope.name, \"{}\") where scope.name == \"{}\"",
                input.scope(),
                input.upstream_scope()
            ),
        ]
    })];
    if input == AgentInput::Prometheus {
        statements.insert(
            0,
            json!({ "statements": ["set(resource.attributes[\"kyma.input.name\"], \"prometheus\")"] }),
        );
    }
    json!({ "error_mode": "ignore", "metric_statements": statements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PodLabel;

    #[test]
    fn user_defined_transform_precedes_filter() {
        let transforms = [
            TransformSpec {
                conditions: vec![r#"IsMatch(span.name, "^GET")"#.to_string()],
                statements: vec![r#"set(span.attributes["verb"], "GET")"#.to_string()],
            },
            TransformSpec {
                statements: vec![r#"delete_key(span.attributes, "password")"#.to_string()],
                ..Default::default()
            },
        ];
        let filters = [FilterSpec {
            conditions: vec![r#"span.name == "healthz""#.to_string()],
        }];

        let processors = user_defined(Signal::Traces, "backend", &transforms, &filters);
        let ids: Vec<&str> = processors.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["transform/user-defined-backend", "filter/user-defined-backend"]);

        let transform = &processors[0].1;
        assert_eq!(transform["error_mode"], "ignore");
        assert_eq!(transform["trace_statements"][0]["conditions"][0], r#"IsMatch(span.name, "^GET")"#);
        assert!(transform["trace_statements"][1].get("conditions").is_none());
        assert_eq!(processors[1].1["traces"]["span"][0], r#"span.name == "healthz""#);
    }

    #[test]
    fn metric_filters_drop_data_points() {
        let filters = [FilterSpec {
            conditions: vec![r#"datapoint.attributes["tenant"] == nil"#.to_string()],
        }];
        let processors = user_defined(Signal::Metrics, "m", &[], &filters);
        assert_eq!(processors.len(), 1);
        assert_eq!(processors[0].0, "filter/user-defined-m");
        assert_eq!(processors[0].1["metrics"]["datapoint"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn no_ottl_renders_no_processors() {
        assert!(user_defined(Signal::Logs, "l", &[], &[]).is_empty());
    }

    #[test]
    fn k8s_attributes_without_enrichments_has_fixed_labels() {
        let body = k8s_attributes(None);
        assert_eq!(body["auth_type"], "serviceAccount");
        assert_eq!(body["extract"]["labels"].as_array().unwrap().len(), 6);
        assert_eq!(body["pod_association"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn pod_label_rules_render_exact_and_prefix() {
        let enrichments = EnrichmentSpec {
            extract_pod_labels: vec![
                PodLabel {
                    key: Some("log.test.exact.should.match".to_string()),
                    key_prefix: None,
                },
                PodLabel {
                    key: None,
                    key_prefix: Some("log.test.prefix".to_string()),
                },
            ],
            cluster: None,
        };
        let body = k8s_attributes(Some(&enrichments));
        let labels = body["extract"]["labels"].as_array().unwrap();
        assert_eq!(labels.len(), 8);
        assert_eq!(
            labels[6],
            json!({
                "from": "pod",
                "key": "log.test.exact.should.match",
                "tag_name": "k8s.pod.label.log.test.exact.should.match",
            })
        );
        assert_eq!(
            labels[7],
            json!({
                "from": "pod",
                "key_regex": "(log.test.prefix.*)",
                "tag_name": "k8s.pod.label.$$1",
            })
        );
    }

    #[test]
    fn cluster_name_falls_back_to_service_host() {
        assert_eq!(
            insert_cluster_name(None)["attributes"][0]["value"],
            "${KUBERNETES_SERVICE_HOST}"
        );
        assert_eq!(
            insert_cluster_name(Some("prod"))["attributes"][0]["value"],
            "prod"
        );
    }

    #[test]
    fn noisy_span_filter_drops_scrape_traffic() {
        let conditions = noisy_span_conditions();
        assert_eq!(conditions.len(), 12);
        assert_eq!(
            conditions[7],
            r#"(attributes["http.method"] == "GET") and (attributes["component"] == "proxy") and (attributes["OperationName"] == "Ingress") and (attributes["user_agent"] == "vm_promscrape")"#
        );
        assert!(conditions[5].contains(r#"IsMatch(attributes["http.url"], ".+/metrics") == true"#));
        assert!(conditions[5].ends_with(r#"(resource.attributes["k8s.namespace.name"] == "kyma-system")"#));
        assert!(conditions[8].contains("telemetry-otlp-traces"));
    }

    #[test]
    fn prometheus_scope_marks_input_name() {
        let body = set_instrumentation_scope(AgentInput::Prometheus, "1.0.0");
        let statements = body["metric_statements"].as_array().unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0]["statements"][0]
            .as_str()
            .unwrap()
            .contains("kyma.input.name"));

        let runtime = set_instrumentation_scope(AgentInput::Runtime, "1.0.0");
        assert!(runtime["metric_statements"][0]["statements"][1]
            .as_str()
            .unwrap()
            .contains(SCOPE_RUNTIME));
    }
}
