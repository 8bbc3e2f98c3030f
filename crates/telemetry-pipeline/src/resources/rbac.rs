//! ServiceAccount permissions per component

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use super::{object_meta, Component, ComponentKind};
use crate::signal::Signal;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const READ: [&str; 3] = ["get", "list", "watch"];

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

fn k8s_attribute_rules() -> Vec<PolicyRule> {
    vec![
        rule("", &["namespaces", "pods"], &READ),
        rule("apps", &["replicasets"], &READ),
    ]
}

fn kubelet_stats_rules() -> Vec<PolicyRule> {
    vec![rule("", &["nodes", "nodes/stats", "nodes/proxy"], &READ)]
}

fn prometheus_rules() -> Vec<PolicyRule> {
    vec![
        rule("", &["nodes", "nodes/metrics", "services", "endpoints", "pods"], &READ),
        PolicyRule {
            non_resource_urls: Some(vec!["/metrics".to_string(), "/metrics/cadvisor".to_string()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        },
    ]
}

fn k8s_cluster_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            "",
            &["events", "namespaces", "nodes", "pods", "replicationcontrollers", "resourcequotas", "services"],
            &READ,
        ),
        rule("apps", &["daemonsets", "deployments", "replicasets", "statefulsets"], &READ),
        rule("batch", &["jobs", "cronjobs"], &READ),
        rule("autoscaling", &["horizontalpodautoscalers"], &READ),
    ]
}

fn module_stats_rules() -> Vec<PolicyRule> {
    vec![
        rule("operator.kyma-project.io", &["telemetries"], &READ),
        rule(
            "telemetry.kyma-project.io",
            &["logpipelines", "metricpipelines", "tracepipelines"],
            &READ,
        ),
    ]
}

/// Cluster-wide rules the component's receivers and processors need
pub fn policy_rules(component: &Component) -> Vec<PolicyRule> {
    match (component.kind, component.signal) {
        (ComponentKind::Gateway, Signal::Metrics) => {
            let mut rules = k8s_attribute_rules();
            rules.extend(module_stats_rules());
            rules
        }
        (ComponentKind::Gateway, _) => k8s_attribute_rules(),
        (ComponentKind::Agent, Signal::Metrics) => {
            let mut rules = kubelet_stats_rules();
            rules.extend(prometheus_rules());
            rules.extend(k8s_cluster_rules());
            rules
        }
        (ComponentKind::Agent, _) | (ComponentKind::FluentBit, _) => {
            vec![rule("", &["namespaces", "pods"], &READ)]
        }
    }
}

fn service_account_subject(component: &Component, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: component.name.clone(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// ClusterRole named after the component
pub fn cluster_role(component: &Component, owners: &[OwnerReference]) -> ClusterRole {
    ClusterRole {
        metadata: object_meta(&component.name, None, owners),
        rules: Some(policy_rules(component)),
        ..Default::default()
    }
}

/// Binding of the component's ClusterRole to its ServiceAccount
pub fn cluster_role_binding(
    component: &Component,
    namespace: &str,
    owners: &[OwnerReference],
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: object_meta(&component.name, None, owners),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: component.name.clone(),
        },
        subjects: Some(vec![service_account_subject(component, namespace)]),
    }
}

/// Lease permissions for singleton receivers of the metric components
pub fn lease_role(component: &Component, namespace: &str, owners: &[OwnerReference]) -> Role {
    Role {
        metadata: object_meta(&component.name, Some(namespace), owners),
        rules: Some(vec![rule(
            "coordination.k8s.io",
            &["leases"],
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        )]),
    }
}

/// Binding of the lease Role to the component's ServiceAccount
pub fn lease_role_binding(
    component: &Component,
    namespace: &str,
    owners: &[OwnerReference],
) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(&component.name, Some(namespace), owners),
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: component.name.clone(),
        },
        subjects: Some(vec![service_account_subject(component, namespace)]),
    }
}
