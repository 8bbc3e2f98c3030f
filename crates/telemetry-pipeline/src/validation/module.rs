//! Checks of the Telemetry module spec

use crate::crd::{EnrichmentSpec, Scaling, ScalingStrategy, TelemetrySpec};
use crate::Error;

/// Reject specs the gateways cannot be built from
pub fn validate_telemetry_spec(spec: &TelemetrySpec) -> Result<(), Error> {
    let gateways = [
        ("spec.trace.gateway.scaling", spec.trace_scaling()),
        ("spec.metric.gateway.scaling", spec.metric_scaling()),
        ("spec.log.gateway.scaling", spec.log_scaling()),
    ];
    for (field, scaling) in gateways {
        if let Some(scaling) = scaling {
            validate_scaling(field, scaling)?;
        }
    }

    let enrichments = [
        ("spec.enrichments", spec.enrichments.as_ref()),
        (
            "spec.log.enrichments",
            spec.log.as_ref().and_then(|l| l.enrichments.as_ref()),
        ),
    ];
    for (field, enrichment) in enrichments {
        if let Some(enrichment) = enrichment {
            validate_enrichments(field, enrichment)?;
        }
    }
    Ok(())
}

fn validate_scaling(field: &str, scaling: &Scaling) -> Result<(), Error> {
    if let Some(fixed) = &scaling.r#static {
        if fixed.replicas < 0 {
            return Err(Error::validation_for_field(
                "telemetry",
                format!("{field}.static.replicas"),
                format!(
                    "static replica count must not be negative, got {}",
                    fixed.replicas
                ),
            ));
        }
    }
    if scaling.type_ == Some(ScalingStrategy::Static) && scaling.r#static.is_none() {
        return Err(Error::validation_for_field(
            "telemetry",
            format!("{field}.static"),
            "Static scaling requires the 'static' settings",
        ));
    }
    Ok(())
}

fn validate_enrichments(field: &str, enrichments: &EnrichmentSpec) -> Result<(), Error> {
    for (i, label) in enrichments.extract_pod_labels.iter().enumerate() {
        let key = label.key.as_deref().filter(|k| !k.is_empty());
        let prefix = label.key_prefix.as_deref().filter(|k| !k.is_empty());
        if key.is_some() == prefix.is_some() {
            return Err(Error::validation_for_field(
                "telemetry",
                format!("{field}.extractPodLabels[{i}]"),
                "Either 'key' or 'keyPrefix' must be specified",
            ));
        }
    }
    Ok(())
}
