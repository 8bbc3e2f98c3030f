use std::collections::BTreeMap;

use kube::ResourceExt;
use serde_json::{json, Value};

use super::exporter::{internal_exporter, otlp_exporter};
use super::ottl;
use super::processors::{self as p};
use super::{otlp_receiver, pipeline_id, ConfigBuilder, RenderOptions, OTLP_RECEIVER};
use crate::crd::{ApplicationInput, LogPipeline, SYSTEM_NAMESPACES};
use crate::render::RenderedConfig;
use crate::secrets::ResolvedSecrets;
use crate::signal::{Signal, FLUENT_BIT_NAME, OTLP_GRPC_PORT};
use crate::Error;

/// Resource attribute the log agent stamps with the owning pipeline
pub const PIPELINE_ATTRIBUTE: &str = "kyma.pipeline.name";

const FILE_STORAGE: &str = "file_storage";
const FILE_STORAGE_DIR: &str = "/var/lib/telemetry-log-agent/file-log-receiver";
const TRACE_PARENT_REGEX: &str =
    "^[0-9a-f]{2}-(?P<trace_id>[0-9a-f]{32})-(?P<span_id>[0-9a-f]{16})-(?P<trace_flags>[0-9a-f]{2})$";

fn from_agent() -> String {
    ottl::resource_attribute_not_nil(PIPELINE_ATTRIBUTE)
}

fn from_otlp() -> String {
    format!("{} == nil", ottl::resource_attribute(PIPELINE_ATTRIBUTE))
}

/// Per-pipeline log filters in the order they run.
///
/// Agent logs carry the name of the pipeline whose filelog receiver read
/// them; every other pipeline drops them. Logs pushed over OTLP carry no
/// pipeline name and pass through the OTLP input settings.
fn pipeline_filters(pipeline: &LogPipeline) -> Vec<(String, Value)> {
    let name = pipeline.name_any();
    let mut filters = vec![(
        format!("filter/{}-drop-foreign-agent-logs", name),
        p::filter_logs(vec![ottl::join_and(&[
            from_agent(),
            format!("{} != \"{}\"", ottl::resource_attribute(PIPELINE_ATTRIBUTE), name),
        ])]),
    )];

    let otlp = pipeline.spec.input.otlp.as_ref();
    if otlp.is_some_and(|o| o.disabled) {
        filters.push((
            "filter/drop-if-input-source-otlp".to_string(),
            p::filter_logs(vec![from_otlp()]),
        ));
    } else if let Some(selector) = otlp.and_then(|o| o.namespaces.as_ref()) {
        if let Some(condition) = ottl::namespace_filter(&from_otlp(), selector) {
            filters.push((
                format!("filter/{}-filter-by-namespace-otlp-input", name),
                p::filter_logs(vec![condition]),
            ));
        }
    }
    filters
}

/// Render the log gateway for the admitted OTel-mode log pipelines
pub fn log_gateway(
    pipelines: &[&LogPipeline],
    secrets: &ResolvedSecrets,
    opts: &RenderOptions,
) -> Result<RenderedConfig, Error> {
    let mut sorted: Vec<&LogPipeline> = pipelines.to_vec();
    sorted.sort_by_key(|p| p.name_any());

    let mut builder = ConfigBuilder::new();
    let mut env = BTreeMap::new();
    let enrichments = opts.enrichments.as_ref();

    for pipeline in &sorted {
        let name = pipeline.name_any();
        let output = pipeline.spec.output.otlp.as_ref().ok_or_else(|| {
            Error::render(
                Signal::Logs.data_type(),
                format!("log pipeline {} has no OTLP output", name),
            )
        })?;
        let id = pipeline_id("logs", &name);
        let exporter = otlp_exporter(&name, output, secrets, sorted.len())?;

        builder
            .add_receiver(&id, OTLP_RECEIVER, otlp_receiver)
            .add_processor(&id, p::MEMORY_LIMITER, p::memory_limiter)
            .add_processor(&id, p::K8S_ATTRIBUTES, || p::k8s_attributes(enrichments));
        for (filter_id, body) in pipeline_filters(pipeline) {
            builder.add_processor(&id, &filter_id, || body);
        }
        builder
            .add_processor(&id, p::INSERT_CLUSTER_NAME, || {
                p::insert_cluster_name(opts.cluster_name())
            })
            .add_processor(&id, p::SERVICE_ENRICHMENT, p::service_enrichment)
            .add_processor(&id, p::DROP_KYMA_ATTRIBUTES, p::drop_kyma_attributes);
        for (processor, body) in p::user_defined(Signal::Logs, &name, &pipeline.spec.transforms, &[]) {
            builder.add_processor(&id, &processor, || body);
        }
        builder
            .add_processor(&id, p::BATCH, p::batch)
            .add_exporter(&id, &exporter.id, exporter.body);
        env.extend(exporter.env);
    }

    Ok(RenderedConfig::collector(builder.build().to_yaml()?, env))
}

/// True if any admitted OTel-mode pipeline reads container logs
pub fn log_agent_required(pipelines: &[&LogPipeline]) -> bool {
    pipelines.iter().any(|p| p.spec.collects_application_logs())
}

fn pod_log_path(namespace: &str, pod: &str, container: &str) -> String {
    format!("/var/log/pods/{}_{}/{}/*.log", namespace, pod, container)
}

fn include_paths(app: &ApplicationInput) -> Vec<String> {
    let star = vec!["*".to_string()];
    let namespaces = if app.namespaces.include.is_empty() {
        &star
    } else {
        &app.namespaces.include
    };
    let containers = if app.containers.include.is_empty() {
        &star
    } else {
        &app.containers.include
    };
    namespaces
        .iter()
        .flat_map(|ns| containers.iter().map(move |c| pod_log_path(ns, "*", c)))
        .collect()
}

fn exclude_paths(app: &ApplicationInput, namespace: &str) -> Vec<String> {
    let agent = Signal::Logs.agent_name().unwrap_or_default();
    let mut paths = vec![
        pod_log_path(namespace, &format!("{}-*", FLUENT_BIT_NAME), "fluent-bit"),
        pod_log_path(namespace, &format!("{}-*", agent), "collector"),
    ];

    let selector = &app.namespaces;
    let mut namespaces: Vec<String> = selector.exclude.clone();
    if !selector.system && selector.include.is_empty() && selector.exclude.is_empty() {
        namespaces = SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect();
    }
    paths.extend(
        namespaces
            .iter()
            .map(|ns| format!("/var/log/pods/{}_*/*/*.log", ns)),
    );
    paths.extend(
        app.containers
            .exclude
            .iter()
            .map(|c| format!("/var/log/pods/*_*/{}/*.log", c)),
    );
    paths
}

fn attr(key: &str) -> String {
    format!("attributes[\"{}\"]", key)
}

fn not_nil(key: &str) -> String {
    format!("{} != nil", attr(key))
}

/// Stanza operators turning container log lines into structured records
fn operators(keep_original_body: bool) -> Vec<Value> {
    let mut ops = vec![
        json!({"id": "containerd-parser", "type": "container", "add_metadata_from_file_path": true, "format": "containerd"}),
        json!({"id": "move-to-log-stream", "type": "move", "from": attr("stream"), "to": attr("log.iostream"), "if": not_nil("stream")}),
        json!({"id": "drop-attribute-log-tag", "type": "remove", "field": attr("logtag")}),
        json!({"id": "body-router", "type": "router", "default": "noop", "routes": [
            {"expr": "body matches '^{.*}$'", "output": "json-parser"}
        ]}),
        json!({"id": "json-parser", "type": "json_parser", "parse_from": "body", "parse_to": "attributes"}),
    ];
    if keep_original_body {
        ops.push(json!({"id": "move-body-to-attributes-log-original", "type": "move", "from": "body", "to": attr("log.original")}));
    } else {
        ops.push(json!({"id": "remove-body", "type": "remove", "field": "body"}));
    }
    ops.extend([
        json!({"id": "move-message-to-body", "type": "move", "from": attr("message"), "to": "body", "if": not_nil("message")}),
        json!({"id": "move-msg-to-body", "type": "move", "from": attr("msg"), "to": "body", "if": not_nil("msg")}),
        json!({"id": "parse-level", "type": "severity_parser", "parse_from": attr("level"), "if": not_nil("level")}),
        json!({"id": "remove-level", "type": "remove", "field": attr("level"), "if": not_nil("level")}),
        json!({"id": "parse-log-level", "type": "severity_parser", "parse_from": attr("log.level"), "if": not_nil("log.level")}),
        json!({"id": "remove-log-level", "type": "remove", "field": attr("log.level"), "if": not_nil("log.level")}),
        json!({"id": "trace-router", "type": "router", "default": "noop", "routes": [
            {"expr": not_nil("trace_id"), "output": "trace-parser"},
            {"expr": format!("{} and {} matches '{}'", not_nil("traceparent"), attr("traceparent"), TRACE_PARENT_REGEX), "output": "trace-parent-parser"},
        ]}),
        json!({"id": "trace-parent-parser", "type": "regex_parser", "regex": TRACE_PARENT_REGEX, "parse_from": attr("traceparent"), "output": "remove-trace-parent", "trace": {
            "trace_id": {"parse_from": attr("trace_id")},
            "span_id": {"parse_from": attr("span_id")},
            "trace_flags": {"parse_from": attr("trace_flags")},
        }}),
        json!({"id": "trace-parser", "type": "trace_parser", "output": "remove-trace-id",
            "trace_id": {"parse_from": attr("trace_id")},
            "span_id": {"parse_from": attr("span_id")},
            "trace_flags": {"parse_from": attr("trace_flags")},
        }),
        json!({"id": "remove-trace-parent", "type": "remove", "field": attr("traceparent")}),
        json!({"id": "remove-trace-id", "type": "remove", "field": attr("trace_id"), "if": not_nil("trace_id")}),
        json!({"id": "remove-span-id", "type": "remove", "field": attr("span_id"), "if": not_nil("span_id")}),
        json!({"id": "remove-trace-flags", "type": "remove", "field": attr("trace_flags"), "if": not_nil("trace_flags")}),
        json!({"id": "noop", "type": "noop"}),
    ]);
    ops
}

fn filelog_receiver(app: &ApplicationInput, namespace: &str) -> Value {
    json!({
        "include": include_paths(app),
        "exclude": exclude_paths(app, namespace),
        "include_file_name": false,
        "include_file_path": true,
        "start_at": "beginning",
        "storage": FILE_STORAGE,
        "retry_on_failure": {
            "enabled": true,
            "initial_interval": "5s",
            "max_interval": "30s",
            "max_elapsed_time": "300s",
        },
        "operators": operators(app.keeps_original_body()),
    })
}

/// Render the log agent tailing container logs for every OTel-mode
/// pipeline with application input
pub fn log_agent(pipelines: &[&LogPipeline], opts: &RenderOptions) -> Result<RenderedConfig, Error> {
    let mut sorted: Vec<&LogPipeline> = pipelines
        .iter()
        .copied()
        .filter(|p| p.spec.collects_application_logs())
        .collect();
    sorted.sort_by_key(|p| p.name_any());

    let mut builder = ConfigBuilder::new();
    builder.add_extension(
        FILE_STORAGE,
        json!({ "create_directory": true, "directory": FILE_STORAGE_DIR }),
    );
    let gateway = internal_exporter(
        &Signal::Logs.otlp_service_name(),
        &opts.namespace,
        OTLP_GRPC_PORT,
    );

    for pipeline in &sorted {
        let name = pipeline.name_any();
        let id = pipeline_id("logs", &name);
        let app = pipeline.spec.input.application.clone().unwrap_or_default();

        builder
            .add_receiver(&id, &format!("filelog/{}", name), || {
                filelog_receiver(&app, &opts.namespace)
            })
            .add_processor(&id, p::MEMORY_LIMITER, p::memory_limiter)
            .add_processor(&id, &format!("resource/insert-pipeline-name-{}", name), || {
                json!({ "attributes": [{ "action": "insert", "key": PIPELINE_ATTRIBUTE, "value": name }] })
            })
            .add_processor(&id, p::BATCH, p::batch)
            .add_exporter(&id, "otlp", gateway.clone());
    }

    Ok(RenderedConfig::collector(builder.build().to_yaml()?, BTreeMap::new()))
}
