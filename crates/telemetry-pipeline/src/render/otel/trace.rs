use std::collections::BTreeMap;

use kube::ResourceExt;

use super::exporter::otlp_exporter;
use super::processors::{self as p};
use super::{otlp_receiver, pipeline_id, ConfigBuilder, RenderOptions, OTLP_RECEIVER};
use crate::crd::TracePipeline;
use crate::render::RenderedConfig;
use crate::secrets::ResolvedSecrets;
use crate::{Error, Signal};

/// Render the trace gateway for the admitted trace pipelines
pub fn trace_gateway(
    pipelines: &[&TracePipeline],
    secrets: &ResolvedSecrets,
    opts: &RenderOptions,
) -> Result<RenderedConfig, Error> {
    let mut sorted: Vec<&TracePipeline> = pipelines.to_vec();
    sorted.sort_by_key(|p| p.name_any());

    let mut builder = ConfigBuilder::new();
    let mut env = BTreeMap::new();
    let enrichments = opts.enrichments.as_ref();

    for pipeline in &sorted {
        let name = pipeline.name_any();
        let id = pipeline_id("traces", &name);
        let exporter = otlp_exporter(&name, &pipeline.spec.output.otlp, secrets, sorted.len())?;

        builder
            .add_receiver(&id, OTLP_RECEIVER, otlp_receiver)
            .add_processor(&id, p::MEMORY_LIMITER, p::memory_limiter)
            .add_processor(&id, p::K8S_ATTRIBUTES, || p::k8s_attributes(enrichments))
            .add_processor(&id, p::ISTIO_NOISE_FILTER, p::istio_noise_filter)
            .add_processor(&id, p::DROP_NOISY_SPANS, p::drop_noisy_spans)
            .add_processor(&id, p::INSERT_CLUSTER_NAME, || {
                p::insert_cluster_name(opts.cluster_name())
            })
            .add_processor(&id, p::SERVICE_ENRICHMENT, p::service_enrichment)
            .add_processor(&id, p::DROP_KYMA_ATTRIBUTES, p::drop_kyma_attributes);
        let spec = &pipeline.spec;
        for (processor, body) in p::user_defined(Signal::Traces, &name, &spec.transforms, &spec.filters) {
            builder.add_processor(&id, &processor, || body);
        }
        builder
            .add_processor(&id, p::BATCH, p::batch)
            .add_exporter(&id, &exporter.id, exporter.body);
        env.extend(exporter.env);
    }

    Ok(RenderedConfig::collector(builder.build().to_yaml()?, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        FilterSpec, OtlpOutput, OtlpProtocol, TraceOutput, TracePipelineSpec, TransformSpec, ValueType,
    };

    fn pipeline(name: &str, endpoint: ValueType) -> TracePipeline {
        TracePipeline::new(
            name,
            TracePipelineSpec {
                output: TraceOutput {
                    otlp: OtlpOutput {
                        protocol: OtlpProtocol::Grpc,
                        endpoint,
                        ..Default::default()
                    },
                },
                ..Default::default()
            },
        )
    }

    // =========================================================================
    // Story Tests: trace gateway rendering
    // =========================================================================

    #[test]
    fn story_two_pipelines_share_receiver_and_get_own_exporters() {
        let a = pipeline("beta", ValueType::inline("https://b:4317"));
        let b = pipeline("alpha", ValueType::inline("https://a:4317"));
        let rendered =
            trace_gateway(&[&a, &b], &ResolvedSecrets::new(), &RenderOptions::new("kyma-system")).unwrap();

        let yaml = rendered.collector_config().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let pipelines = &doc["service"]["pipelines"];
        assert!(pipelines["traces/alpha"].is_mapping());
        assert!(pipelines["traces/beta"].is_mapping());
        assert_eq!(pipelines["traces/alpha"]["exporters"][0], "otlp/alpha");

        let processors: Vec<&str> = pipelines["traces/alpha"]["processors"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(
            processors,
            vec![
                "memory_limiter",
                "k8sattributes",
                "istio_noise_filter",
                "filter/drop-noisy-spans",
                "resource/insert-cluster-name",
                "service_enrichment",
                "resource/drop-kyma-attributes",
                "batch",
            ]
        );
        assert_eq!(doc["exporters"]["otlp/alpha"]["sending_queue"]["queue_size"], 128);
        assert_eq!(rendered.env["OTLP_ENDPOINT_ALPHA"], "https://a:4317");
        assert_eq!(rendered.env["OTLP_ENDPOINT_BETA"], "https://b:4317");
    }

    /// Story: user OTTL runs after the built-in enrichment and before batching
    #[test]
    fn story_user_ottl_runs_before_batch() {
        let mut a = pipeline("alpha", ValueType::inline("https://a:4317"));
        a.spec.transforms = vec![TransformSpec {
            statements: vec![r#"set(span.attributes["team"], "checkout")"#.to_string()],
            ..Default::default()
        }];
        a.spec.filters = vec![FilterSpec {
            conditions: vec![r#"span.name == "healthz""#.to_string()],
        }];
        let b = pipeline("beta", ValueType::inline("https://b:4317"));
        let rendered =
            trace_gateway(&[&a, &b], &ResolvedSecrets::new(), &RenderOptions::new("kyma-system")).unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(rendered.collector_config().unwrap()).unwrap();
        let processors = |pipeline: &str| -> Vec<String> {
            doc["service"]["pipelines"][pipeline]["processors"]
                .as_sequence()
                .unwrap()
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        };
        assert_eq!(
            processors("traces/alpha")[6..],
            [
                "resource/drop-kyma-attributes",
                "transform/user-defined-alpha",
                "filter/user-defined-alpha",
                "batch",
            ]
        );
        assert!(!processors("traces/beta").iter().any(|p| p.contains("user-defined")));
        assert_eq!(
            doc["processors"]["transform/user-defined-alpha"]["trace_statements"][0]["statements"][0],
            r#"set(span.attributes["team"], "checkout")"#
        );
    }

    #[test]
    fn story_render_is_order_independent() {
        let a = pipeline("a", ValueType::inline("https://a:4317"));
        let b = pipeline("b", ValueType::inline("https://b:4317"));
        let opts = RenderOptions::new("kyma-system");
        let first = trace_gateway(&[&a, &b], &ResolvedSecrets::new(), &opts).unwrap();
        let second = trace_gateway(&[&b, &a], &ResolvedSecrets::new(), &opts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn story_secret_values_stay_out_of_config_text() {
        let a = pipeline("a", ValueType::from_secret("endpoint", "default", "url"));
        let mut secrets = ResolvedSecrets::new();
        secrets.insert(
            crate::crd::SecretKeyRef {
                name: "endpoint".to_string(),
                namespace: "default".to_string(),
                key: "url".to_string(),
            },
            "https://secret-host:4317",
        );
        let rendered = trace_gateway(&[&a], &secrets, &RenderOptions::new("kyma-system")).unwrap();
        assert!(!rendered.collector_config().unwrap().contains("secret-host"));
        assert_eq!(rendered.env["OTLP_ENDPOINT_A"], "https://secret-host:4317");
    }

    #[test]
    fn unresolved_secret_fails_render() {
        let a = pipeline("a", ValueType::from_secret("missing", "default", "url"));
        assert!(trace_gateway(&[&a], &ResolvedSecrets::new(), &RenderOptions::new("kyma-system")).is_err());
    }
}
