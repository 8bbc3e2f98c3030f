//! Services in front of the components

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{object_meta, selector_labels, Component, ComponentKind};
use crate::signal::{FLUENT_BIT_HTTP_PORT, METRICS_PORT, OTLP_GRPC_PORT, OTLP_HTTP_PORT};
use telemetry_common::SELF_MONITOR_LABEL;

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

/// OTLP push Service of a gateway (`telemetry-otlp-<signal>`)
pub fn otlp_service(component: &Component, namespace: &str, owners: &[OwnerReference]) -> Service {
    let name = component.signal.otlp_service_name();
    Service {
        metadata: object_meta(&name, Some(namespace), owners),
        spec: Some(ServiceSpec {
            ports: Some(vec![
                tcp_port("grpc-collector", OTLP_GRPC_PORT),
                tcp_port("http-collector", OTLP_HTTP_PORT),
            ]),
            selector: Some(selector_labels(&component.name)),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Port the self-monitor scrapes
pub fn metrics_port(component: &Component) -> i32 {
    match component.kind {
        ComponentKind::FluentBit => FLUENT_BIT_HTTP_PORT,
        _ => METRICS_PORT,
    }
}

/// Scrape Service picked up by the self-monitor
pub fn metrics_service(component: &Component, namespace: &str, owners: &[OwnerReference]) -> Service {
    let port = metrics_port(component);
    let mut metadata = object_meta(&component.metrics_service_name(), Some(namespace), owners);
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(SELF_MONITOR_LABEL.to_string(), "enabled".to_string());

    let mut annotations = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), port.to_string()),
        ("prometheus.io/scheme".to_string(), "http".to_string()),
    ]);
    if component.kind == ComponentKind::FluentBit {
        annotations.insert(
            "prometheus.io/path".to_string(),
            "/api/v2/metrics/prometheus".to_string(),
        );
    }
    metadata.annotations = Some(annotations);

    Service {
        metadata,
        spec: Some(ServiceSpec {
            ports: Some(vec![tcp_port("http-metrics", port)]),
            selector: Some(selector_labels(&component.name)),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
