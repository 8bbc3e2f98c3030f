use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::{json, Value};

use super::exporter::{internal_exporter, otlp_exporter};
use super::ottl::{self, SCOPE_ISTIO, SCOPE_PROMETHEUS, SCOPE_RUNTIME};
use super::processors::{self as p, AgentInput};
use super::{otlp_receiver, pipeline_id, ConfigBuilder, RenderOptions, OTLP_RECEIVER};
use crate::crd::{MetricInput, MetricPipeline, RuntimeResource};
use crate::render::RenderedConfig;
use crate::secrets::ResolvedSecrets;
use crate::signal::{Signal, OTLP_GRPC_PORT};
use crate::Error;

const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");
const SCRAPE_INTERVAL: &str = "30s";
const SAMPLE_LIMIT: u32 = 50000;

const DIAGNOSTIC_METRICS: [&str; 5] = [
    "up",
    "scrape_duration_seconds",
    "scrape_samples_scraped",
    "scrape_samples_post_metric_relabeling",
    "scrape_series_added",
];

fn runtime_resource_regex(resource: RuntimeResource) -> &'static str {
    match resource {
        RuntimeResource::Pod => "^k8s.pod.*",
        RuntimeResource::Container => "(^k8s.container.*)|(^container.*)",
        RuntimeResource::Node => "^k8s.node.*",
        RuntimeResource::Volume => "^k8s.volume.*",
        RuntimeResource::Deployment => "^k8s.deployment.*",
        RuntimeResource::DaemonSet => "^k8s.daemonset.*",
        RuntimeResource::StatefulSet => "^k8s.statefulset.*",
        RuntimeResource::Job => "^k8s.job.*",
    }
}

fn diagnostic_filter(scope: &str) -> Value {
    let names: Vec<String> = DIAGNOSTIC_METRICS
        .iter()
        .map(|n| format!("name == \"{}\"", n))
        .collect();
    p::filter_metrics(vec![ottl::join_and(&[
        ottl::scope_name_equals(scope),
        ottl::parenthesize(&ottl::join_or(&names)),
    ])])
}

/// Per-pipeline filters in the order they run
fn pipeline_filters(name: &str, input: &MetricInput) -> Vec<(String, Value)> {
    let mut filters = Vec::new();
    let runtime = ottl::scope_name_equals(SCOPE_RUNTIME);
    let prometheus = ottl::scope_name_equals(SCOPE_PROMETHEUS);
    let istio = ottl::scope_name_equals(SCOPE_ISTIO);
    let otlp = ottl::is_otlp_metric();

    let sources = [
        ("runtime", input.runtime_enabled(), &runtime, input.runtime_namespaces()),
        ("prometheus", input.prometheus_enabled(), &prometheus, input.prometheus_namespaces()),
        ("istio", input.istio_enabled(), &istio, input.istio_namespaces()),
        ("otlp", input.otlp_enabled(), &otlp, input.otlp_namespaces()),
    ];

    for (source, enabled, expr, _) in &sources {
        if !enabled {
            filters.push((
                format!("filter/drop-if-input-source-{}", source),
                p::filter_metrics(vec![(*expr).clone()]),
            ));
        }
    }

    for (source, enabled, expr, selector) in &sources {
        if !enabled {
            continue;
        }
        if let Some(condition) = ottl::namespace_filter(expr, selector) {
            filters.push((
                format!("filter/{}-filter-by-namespace-{}-input", name, source),
                p::filter_metrics(vec![condition]),
            ));
        }
    }

    if input.prometheus_enabled() && !input.prometheus_diagnostics() {
        filters.push((
            "filter/drop-diagnostic-metrics-if-input-source-prometheus".to_string(),
            diagnostic_filter(SCOPE_PROMETHEUS),
        ));
    }
    if input.istio_enabled() && !input.istio_diagnostics() {
        filters.push((
            "filter/drop-diagnostic-metrics-if-input-source-istio".to_string(),
            diagnostic_filter(SCOPE_ISTIO),
        ));
    }

    if let Some(runtime_input) = input.runtime.as_ref().filter(|r| r.enabled) {
        for resource in RuntimeResource::ALL {
            if !runtime_input.resource_enabled(resource) {
                filters.push((
                    format!("filter/drop-runtime-{}-metrics", resource.as_str()),
                    p::filter_metrics(vec![ottl::join_and(&[
                        runtime.clone(),
                        ottl::is_match("name", runtime_resource_regex(resource)),
                    ])]),
                ));
            }
        }
    }

    filters
}

/// Render the metric gateway for the admitted metric pipelines
pub fn metric_gateway(
    pipelines: &[&MetricPipeline],
    secrets: &ResolvedSecrets,
    opts: &RenderOptions,
) -> Result<RenderedConfig, Error> {
    let mut sorted: Vec<&MetricPipeline> = pipelines.to_vec();
    sorted.sort_by_key(|p| p.name_any());

    let mut builder = ConfigBuilder::new();
    let mut env = BTreeMap::new();
    let enrichments = opts.enrichments.as_ref();

    for pipeline in &sorted {
        let name = pipeline.name_any();
        let id = pipeline_id("metrics", &name);
        let exporter = otlp_exporter(&name, &pipeline.spec.output.otlp, secrets, sorted.len())?;

        builder
            .add_receiver(&id, OTLP_RECEIVER, otlp_receiver)
            .add_processor(&id, p::MEMORY_LIMITER, p::memory_limiter)
            .add_processor(&id, p::K8S_ATTRIBUTES, || p::k8s_attributes(enrichments))
            .add_processor(&id, p::INSERT_CLUSTER_NAME, || {
                p::insert_cluster_name(opts.cluster_name())
            })
            .add_processor(&id, p::SERVICE_ENRICHMENT, p::service_enrichment)
            .add_processor(&id, p::DROP_KYMA_ATTRIBUTES, p::drop_kyma_attributes);
        for (filter_id, body) in pipeline_filters(&name, &pipeline.spec.input) {
            builder.add_processor(&id, &filter_id, || body);
        }
        let spec = &pipeline.spec;
        for (processor, body) in p::user_defined(Signal::Metrics, &name, &spec.transforms, &spec.filters) {
            builder.add_processor(&id, &processor, || body);
        }
        builder
            .add_processor(&id, p::BATCH, p::batch)
            .add_exporter(&id, &exporter.id, exporter.body);
        env.extend(exporter.env);
    }

    Ok(RenderedConfig::collector(builder.build().to_yaml()?, env))
}

/// True if any admitted pipeline needs the metric agent
pub fn metric_agent_required(pipelines: &[&MetricPipeline]) -> bool {
    pipelines.iter().any(|p| p.spec.input.needs_agent())
}

fn relabel(source_labels: &[&str], action: &str, regex: Option<&str>) -> Value {
    let mut rule = json!({ "source_labels": source_labels, "action": action });
    if let Some(regex) = regex {
        rule["regex"] = Value::String(regex.to_string());
    }
    rule
}

fn replace(source_labels: &[&str], regex: &str, target: &str, replacement: Option<&str>) -> Value {
    let mut rule = relabel(source_labels, "replace", Some(regex));
    rule["target_label"] = Value::String(target.to_string());
    if let Some(replacement) = replacement {
        rule["replacement"] = Value::String(replacement.to_string());
    }
    rule
}

/// Scrape config for workloads annotated with `prometheus.io/scrape`;
/// `resource` is `pod` or `service`
fn annotated_scrape_config(job: &str, role: &str, resource: &str) -> Value {
    let node_label = if role == "pod" {
        "__meta_kubernetes_pod_node_name"
    } else {
        "__meta_kubernetes_endpoint_node_name"
    };
    let annotation = |name: &str| format!("__meta_kubernetes_{}_annotation_prometheus_io_{}", resource, name);

    let mut rules = vec![
        relabel(&[node_label], "keep", Some("${MY_NODE_NAME}")),
        relabel(&[annotation("scrape").as_str()], "keep", Some("true")),
        relabel(&["__meta_kubernetes_pod_phase"], "drop", Some("Pending|Succeeded|Failed")),
        relabel(&["__meta_kubernetes_pod_container_init"], "drop", Some("(true)")),
        relabel(&["__meta_kubernetes_pod_container_name"], "drop", Some("(istio-proxy)")),
        replace(
            &["__meta_kubernetes_pod_label_security_istio_io_tlsMode"],
            "(istio)",
            "__scheme__",
            Some("https"),
        ),
        replace(&[annotation("scheme").as_str()], "(https?)", "__scheme__", None),
        relabel(&["__scheme__"], "drop", Some("(https)")),
        replace(&[annotation("path").as_str()], "(.+)", "__metrics_path__", None),
        replace(
            &["__address__", annotation("port").as_str()],
            "([^:]+)(?::\\d+)?;(\\d+)",
            "__address__",
            Some("$$1:$$2"),
        ),
    ];
    if resource == "service" {
        let mut service = relabel(&["__meta_kubernetes_service_name"], "replace", None);
        service["target_label"] = Value::String("service".to_string());
        rules.push(service);
    }

    json!({
        "job_name": job,
        "scrape_interval": SCRAPE_INTERVAL,
        "sample_limit": SAMPLE_LIMIT,
        "kubernetes_sd_configs": [{ "role": role }],
        "relabel_configs": rules,
    })
}

fn prometheus_receiver(scrape_configs: Vec<Value>) -> Value {
    json!({ "config": { "scrape_configs": scrape_configs } })
}

fn kubeletstats_receiver() -> Value {
    json!({
        "collection_interval": SCRAPE_INTERVAL,
        "auth_type": "serviceAccount",
        "insecure_skip_verify": true,
        "endpoint": "https://${MY_NODE_NAME}:10250",
        "metric_groups": ["container", "pod", "node", "volume"],
    })
}

fn istio_scrape_config() -> Value {
    json!({
        "job_name": "istio-proxy",
        "sample_limit": SAMPLE_LIMIT,
        "metrics_path": "/stats/prometheus",
        "scrape_interval": SCRAPE_INTERVAL,
        "kubernetes_sd_configs": [{ "role": "pod" }],
        "relabel_configs": [
            relabel(&["__meta_kubernetes_pod_node_name"], "keep", Some("${MY_NODE_NAME}")),
            relabel(&["__meta_kubernetes_pod_container_name"], "keep", Some("istio-proxy")),
            relabel(&["__meta_kubernetes_pod_container_port_name"], "keep", Some("http-envoy-prom")),
            relabel(&["__meta_kubernetes_pod_phase"], "drop", Some("Pending|Succeeded|Failed")),
        ],
        "metric_relabel_configs": [
            relabel(&["__name__"], "keep", Some("istio_.*")),
        ],
    })
}

/// Render the metric agent scraping the inputs enabled by any pipeline
pub fn metric_agent(pipelines: &[&MetricPipeline], opts: &RenderOptions) -> Result<RenderedConfig, Error> {
    let runtime = pipelines.iter().any(|p| p.spec.input.runtime_enabled());
    let prometheus = pipelines.iter().any(|p| p.spec.input.prometheus_enabled());
    let istio = pipelines.iter().any(|p| p.spec.input.istio_enabled());

    let mut builder = ConfigBuilder::new();
    let gateway = internal_exporter(
        &Signal::Metrics.otlp_service_name(),
        &opts.namespace,
        OTLP_GRPC_PORT,
    );

    let add_input = |builder: &mut ConfigBuilder, input: AgentInput, receivers: Vec<(&str, Value)>| {
        let id = format!("metrics/{}", input.name());
        for (receiver_id, body) in receivers {
            builder.add_receiver(&id, receiver_id, || body);
        }
        builder.add_processor(&id, p::MEMORY_LIMITER, p::memory_limiter);
        if input == AgentInput::Istio {
            builder.add_processor(&id, p::ISTIO_NOISE_FILTER, p::istio_noise_filter);
        }
        builder
            .add_processor(
                &id,
                &format!("transform/set-instrumentation-scope-{}", input.name()),
                || p::set_instrumentation_scope(input, SCOPE_VERSION),
            )
            .add_processor(&id, p::BATCH, p::batch)
            .add_exporter(&id, "otlp", gateway.clone());
    };

    if runtime {
        add_input(&mut builder, AgentInput::Runtime, vec![("kubeletstats", kubeletstats_receiver())]);
    }
    if prometheus {
        add_input(
            &mut builder,
            AgentInput::Prometheus,
            vec![
                (
                    "prometheus/app-pods",
                    prometheus_receiver(vec![annotated_scrape_config("app-pods", "pod", "pod")]),
                ),
                (
                    "prometheus/app-services",
                    prometheus_receiver(vec![annotated_scrape_config(
                        "app-services",
                        "endpoints",
                        "service",
                    )]),
                ),
            ],
        );
    }
    if istio {
        add_input(
            &mut builder,
            AgentInput::Istio,
            vec![("prometheus/istio", prometheus_receiver(vec![istio_scrape_config()]))],
        );
    }

    Ok(RenderedConfig::collector(builder.build().to_yaml()?, BTreeMap::new()))
}
