//! Admission rules for MetricPipeline and TracePipeline

use kube::ResourceExt;

use super::ottl::{validate_filters, validate_transforms};
use super::otlp::validate_otlp_output;
use crate::crd::{FilterSpec, MetricPipeline, NamespaceSelector, TracePipeline, TransformSpec};
use crate::{Error, Signal};

fn validate_selector(
    pipeline: &str,
    field: &str,
    selector: Option<&NamespaceSelector>,
) -> Result<(), Error> {
    match selector {
        Some(s) if !s.include.is_empty() && !s.exclude.is_empty() => {
            Err(Error::validation_for_field(
                pipeline,
                field,
                "Can only define one namespace selector - either 'include' or 'exclude'",
            ))
        }
        _ => Ok(()),
    }
}

/// User-defined OTTL transforms and filters of a gateway pipeline
pub(super) fn validate_ottl(
    pipeline: &str,
    signal: Signal,
    transforms: &[TransformSpec],
    filters: &[FilterSpec],
) -> Result<(), Error> {
    validate_transforms(signal, transforms)
        .map_err(|e| Error::validation_for_field(pipeline, "spec.transforms", e.to_string()))?;
    validate_filters(signal, filters)
        .map_err(|e| Error::validation_for_field(pipeline, "spec.filters", e.to_string()))
}

/// Admission check of a MetricPipeline
pub fn validate_metric_pipeline(pipeline: &MetricPipeline) -> Result<(), Error> {
    let name = pipeline.name_any();
    let input = &pipeline.spec.input;
    validate_selector(
        &name,
        "spec.input.prometheus.namespaces",
        input.prometheus.as_ref().and_then(|i| i.namespaces.as_ref()),
    )?;
    validate_selector(
        &name,
        "spec.input.runtime.namespaces",
        input.runtime.as_ref().and_then(|i| i.namespaces.as_ref()),
    )?;
    validate_selector(
        &name,
        "spec.input.istio.namespaces",
        input.istio.as_ref().and_then(|i| i.namespaces.as_ref()),
    )?;
    validate_selector(
        &name,
        "spec.input.otlp.namespaces",
        input.otlp.as_ref().and_then(|i| i.namespaces.as_ref()),
    )?;
    validate_ottl(
        &name,
        Signal::Metrics,
        &pipeline.spec.transforms,
        &pipeline.spec.filters,
    )?;
    validate_otlp_output(&name, "spec.output.otlp", &pipeline.spec.output.otlp)
}

/// Admission check of a TracePipeline
pub fn validate_trace_pipeline(pipeline: &TracePipeline) -> Result<(), Error> {
    let name = pipeline.name_any();
    validate_ottl(
        &name,
        Signal::Traces,
        &pipeline.spec.transforms,
        &pipeline.spec.filters,
    )?;
    validate_otlp_output(&name, "spec.output.otlp", &pipeline.spec.output.otlp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        MetricInput, MetricOutput, MetricPipelineSpec, OtlpOutput, OtlpProtocol, RuntimeInput,
        TraceOutput, TracePipelineSpec,
    };

    fn metric_pipeline(input: MetricInput) -> MetricPipeline {
        MetricPipeline::new(
            "metrics",
            MetricPipelineSpec {
                input,
                output: MetricOutput {
                    otlp: OtlpOutput::new(OtlpProtocol::Grpc, "http://backend:4317"),
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn include_and_exclude_together_are_rejected() {
        let pipeline = metric_pipeline(MetricInput {
            runtime: Some(RuntimeInput {
                enabled: true,
                namespaces: Some(NamespaceSelector {
                    include: vec!["a".to_string()],
                    exclude: vec!["b".to_string()],
                }),
                resources: None,
            }),
            ..Default::default()
        });
        match validate_metric_pipeline(&pipeline).unwrap_err() {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.input.runtime.namespaces"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_selector_is_accepted() {
        let pipeline = metric_pipeline(MetricInput {
            runtime: Some(RuntimeInput {
                enabled: true,
                namespaces: Some(NamespaceSelector::include(&["ns1"])),
                resources: None,
            }),
            ..Default::default()
        });
        assert!(validate_metric_pipeline(&pipeline).is_ok());
    }

    #[test]
    fn trace_pipeline_with_grpc_path_is_rejected() {
        let mut output = OtlpOutput::new(OtlpProtocol::Grpc, "http://backend:4317");
        output.path = Some("/v1/traces".to_string());
        let pipeline = TracePipeline::new(
            "traces",
            TracePipelineSpec {
                output: TraceOutput { otlp: output },
                ..Default::default()
            },
        );
        assert!(validate_trace_pipeline(&pipeline).is_err());
    }

    #[test]
    fn invalid_transform_is_rejected_on_its_field() {
        let mut pipeline = metric_pipeline(MetricInput::default());
        pipeline.spec.transforms = vec![TransformSpec {
            statements: vec![r#"set(datapoint.value, 1)"#.to_string()],
            ..Default::default()
        }];
        match validate_metric_pipeline(&pipeline).unwrap_err() {
            Error::Validation { field, message, .. } => {
                assert_eq!(field.as_deref(), Some("spec.transforms"));
                assert!(message.contains("datapoint has no field value"), "{}", message);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn span_event_filter_is_rejected_on_its_field() {
        let pipeline = TracePipeline::new(
            "traces",
            TracePipelineSpec {
                output: TraceOutput {
                    otlp: OtlpOutput::new(OtlpProtocol::Grpc, "http://backend:4317"),
                },
                filters: vec![FilterSpec {
                    conditions: vec![r#"spanevent.name == "ping""#.to_string()],
                }],
                ..Default::default()
            },
        );
        match validate_trace_pipeline(&pipeline).unwrap_err() {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.filters")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
