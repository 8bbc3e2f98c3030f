//! Ingress rules of a component's pods
//!
//! Data and health ports accept traffic from anywhere. The profiling port
//! only accepts traffic from the operator's own pods.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{object_meta, selector_labels, Component, ComponentKind};
use crate::signal::{
    FLUENT_BIT_HTTP_PORT, HEALTH_CHECK_PORT, METRICS_PORT, OTLP_GRPC_PORT, OTLP_HTTP_PORT, PPROF_PORT,
};
use telemetry_common::NAME_LABEL;

/// Name label value of the operator's pods
pub const OPERATOR_NAME: &str = "telemetry-manager";

fn tcp_ports(ports: &[i32]) -> Vec<NetworkPolicyPort> {
    ports
        .iter()
        .map(|port| NetworkPolicyPort {
            protocol: Some("TCP".to_string()),
            port: Some(IntOrString::Int(*port)),
            ..Default::default()
        })
        .collect()
}

fn any_address() -> Vec<NetworkPolicyPeer> {
    ["0.0.0.0/0", "::/0"]
        .into_iter()
        .map(|cidr| NetworkPolicyPeer {
            ip_block: Some(IPBlock {
                cidr: cidr.to_string(),
                except: None,
            }),
            ..Default::default()
        })
        .collect()
}

/// Ports open to every client
pub fn public_ports(component: &Component) -> Vec<i32> {
    match component.kind {
        ComponentKind::Gateway => vec![OTLP_GRPC_PORT, OTLP_HTTP_PORT, METRICS_PORT, HEALTH_CHECK_PORT],
        ComponentKind::Agent => vec![METRICS_PORT, HEALTH_CHECK_PORT],
        ComponentKind::FluentBit => vec![FLUENT_BIT_HTTP_PORT],
    }
}

/// NetworkPolicy selecting the component's pods
pub fn network_policy(component: &Component, namespace: &str, owners: &[OwnerReference]) -> NetworkPolicy {
    let mut ingress = vec![NetworkPolicyIngressRule {
        from: Some(any_address()),
        ports: Some(tcp_ports(&public_ports(component))),
    }];
    if component.kind != ComponentKind::FluentBit {
        ingress.push(NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                pod_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        NAME_LABEL.to_string(),
                        OPERATOR_NAME.to_string(),
                    )])),
                    ..Default::default()
                }),
                namespace_selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "kubernetes.io/metadata.name".to_string(),
                        namespace.to_string(),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ports: Some(tcp_ports(&[PPROF_PORT])),
        });
    }

    NetworkPolicy {
        metadata: object_meta(&component.name, Some(namespace), owners),
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector {
                match_labels: Some(selector_labels(&component.name)),
                ..Default::default()
            },
            ingress: Some(ingress),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(any_address()),
                ports: None,
            }]),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;

    fn port_numbers(rule: &NetworkPolicyIngressRule) -> Vec<i32> {
        rule.ports
            .as_ref()
            .unwrap()
            .iter()
            .filter_map(|p| match p.port {
                Some(IntOrString::Int(n)) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn gateway_accepts_otlp_from_anywhere() {
        let np = network_policy(&Component::gateway(Signal::Traces), "kyma-system", &[]);
        let ingress = np.spec.unwrap().ingress.unwrap();
        assert_eq!(port_numbers(&ingress[0]), vec![4317, 4318, 8888, 13133]);
        assert!(!port_numbers(&ingress[0]).contains(&PPROF_PORT));
    }

    #[test]
    fn profiling_port_is_limited_to_operator_pods() {
        let np = network_policy(&Component::agent(Signal::Metrics).unwrap(), "kyma-system", &[]);
        let ingress = np.spec.unwrap().ingress.unwrap();
        let pprof = &ingress[1];
        assert_eq!(port_numbers(pprof), vec![PPROF_PORT]);
        let peer = &pprof.from.as_ref().unwrap()[0];
        assert_eq!(
            peer.pod_selector.as_ref().unwrap().match_labels.as_ref().unwrap()[NAME_LABEL],
            OPERATOR_NAME
        );
        assert!(peer.ip_block.is_none());
    }

    #[test]
    fn fluent_bit_exposes_only_http_server() {
        let np = network_policy(&Component::fluent_bit(), "kyma-system", &[]);
        let ingress = np.spec.unwrap().ingress.unwrap();
        assert_eq!(ingress.len(), 1);
        assert_eq!(port_numbers(&ingress[0]), vec![2020]);
    }
}
