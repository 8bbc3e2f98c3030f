//! CRD installation
//!
//! The operator installs its own CRDs on startup with server-side apply so
//! the schemas always match the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use telemetry_common::crd::{LogParser, LogPipeline, MetricPipeline, Telemetry, TracePipeline};
use telemetry_common::retry::{retry_with_backoff, RetryConfig};
use telemetry_common::FIELD_MANAGER;

/// Every CRD served by the operator
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        LogPipeline::crd(),
        MetricPipeline::crd(),
        TracePipeline::crd(),
        LogParser::crd(),
        Telemetry::crd(),
    ]
}

/// All CRDs as one multi-document YAML stream
pub fn crds_yaml() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(&crd)?);
    }
    Ok(out)
}

/// Install or update every CRD, retrying while the API server is unreachable
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(10);

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        let (api, params, crd_name, crd) = (&crds, &params, name.as_str(), &crd);
        retry_with_backoff(&retry, "install CRD", || async move {
            api.patch(crd_name, params, &Patch::Apply(crd)).await
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("all telemetry CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_crd_is_named_after_its_plural() {
        let names: Vec<String> = all_crds()
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "logpipelines.telemetry.kyma-project.io",
                "metricpipelines.telemetry.kyma-project.io",
                "tracepipelines.telemetry.kyma-project.io",
                "logparsers.telemetry.kyma-project.io",
                "telemetries.operator.kyma-project.io",
            ]
        );
    }

    #[test]
    fn yaml_stream_holds_one_document_per_crd() {
        let yaml = crds_yaml().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 5);
        assert!(yaml.contains("kind: CustomResourceDefinition"));
    }
}
