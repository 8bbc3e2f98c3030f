//! Validating admission webhook
//!
//! Serves the pipeline and parser validation endpoints over TLS with a
//! certificate generated at startup, and registers itself with the API
//! server through a ValidatingWebhookConfiguration.

pub mod certs;
pub mod validate;

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::admissionregistration::v1::{
    RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration,
    WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use tracing::info;

use telemetry_common::{FIELD_MANAGER, NAME_LABEL};
use telemetry_pipeline::resources::network_policy::OPERATOR_NAME;

pub use certs::{generate as generate_certs, WebhookCerts};
pub use validate::WebhookError;

/// Name of the ValidatingWebhookConfiguration
pub const WEBHOOK_CONFIGURATION_NAME: &str = "validation.webhook.telemetry.kyma-project.io";

/// Validated resources with their endpoint paths
const VALIDATED: [(&str, &str); 4] = [
    ("logpipelines", "/validate-logpipeline"),
    ("logparsers", "/validate-logparser"),
    ("metricpipelines", "/validate-metricpipeline"),
    ("tracepipelines", "/validate-tracepipeline"),
];

/// Router of the admission endpoints
pub fn router() -> Router {
    Router::new()
        .route("/validate-logpipeline", post(validate::validate_log_pipeline))
        .route("/validate-logparser", post(validate::validate_log_parser))
        .route("/validate-metricpipeline", post(validate::validate_metric_pipeline))
        .route("/validate-tracepipeline", post(validate::validate_trace_pipeline))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve the admission endpoints over TLS until the process exits
pub async fn serve(addr: SocketAddr, certs: &WebhookCerts) -> anyhow::Result<()> {
    let tls_config = RustlsConfig::from_pem(
        certs.cert_pem.clone().into_bytes(),
        certs.key_pem.clone().into_bytes(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("webhook TLS config error: {}", e))?;

    info!(%addr, "starting admission webhook server");
    axum_server::bind_rustls(addr, tls_config)
        .serve(router().into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("webhook server error: {}", e))
}

/// The ClusterIP Service the API server calls
pub fn webhook_service(name: &str, namespace: &str, port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                NAME_LABEL.to_string(),
                OPERATOR_NAME.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("https-webhook".to_string()),
                port: 443,
                target_port: Some(IntOrString::Int(i32::from(port))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// One validating webhook per resource, all pointing at the same Service
pub fn webhook_configuration(
    service: &str,
    namespace: &str,
    ca_cert_pem: &str,
) -> ValidatingWebhookConfiguration {
    let webhooks = VALIDATED
        .iter()
        .map(|(resource, path)| ValidatingWebhook {
            name: format!("{}.webhook.telemetry.kyma-project.io", resource),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some("Fail".to_string()),
            match_policy: Some("Exact".to_string()),
            timeout_seconds: Some(15),
            rules: Some(vec![RuleWithOperations {
                operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
                api_groups: Some(vec!["telemetry.kyma-project.io".to_string()]),
                api_versions: Some(vec!["v1alpha1".to_string()]),
                resources: Some(vec![resource.to_string()]),
                scope: Some("*".to_string()),
            }]),
            client_config: WebhookClientConfig {
                service: Some(ServiceReference {
                    name: service.to_string(),
                    namespace: namespace.to_string(),
                    path: Some(path.to_string()),
                    port: Some(443),
                }),
                ca_bundle: Some(ByteString(ca_cert_pem.as_bytes().to_vec())),
                ..Default::default()
            },
            ..Default::default()
        })
        .collect();

    ValidatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_CONFIGURATION_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(webhooks),
    }
}

/// Apply the webhook Service and the ValidatingWebhookConfiguration
pub async fn ensure_webhook_config(
    client: &Client,
    service: &str,
    namespace: &str,
    port: u16,
    ca_cert_pem: &str,
) -> anyhow::Result<()> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    services
        .patch(
            service,
            &params,
            &Patch::Apply(&webhook_service(service, namespace, port)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to apply webhook Service: {}", e))?;

    let configurations: Api<ValidatingWebhookConfiguration> = Api::all(client.clone());
    configurations
        .patch(
            WEBHOOK_CONFIGURATION_NAME,
            &params,
            &Patch::Apply(&webhook_configuration(service, namespace, ca_cert_pem)),
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to apply ValidatingWebhookConfiguration: {}", e))?;

    info!("admission webhook configuration installed");
    Ok(())
}
