//! Gateway Deployments and agent DaemonSets

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource, EnvVar,
    EnvVarSource, HTTPGetAction, HostPathVolumeSource, ObjectFieldSelector, PodAffinityTerm,
    PodAntiAffinity, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource,
    SecretVolumeSource, SecurityContext, Toleration, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    labels, object_meta, selector_labels, Component, ComponentInputs, ComponentKind,
    CHECKSUM_ANNOTATION, ISTIO_INJECT_ANNOTATION,
};
use crate::render::fluent_bit::{CONFIG_DIR, DATA_DIR, MAIN_CONFIG, TLS_DIR};
use crate::render::COLLECTOR_CONFIG_KEY;
use crate::signal::{
    Signal, FLUENT_BIT_HTTP_PORT, HEALTH_CHECK_PORT, METRICS_PORT, OTLP_GRPC_PORT, OTLP_HTTP_PORT,
};

/// Mount path of the collector ConfigMap
pub const COLLECTOR_CONFIG_DIR: &str = "/conf";
/// Host directory with pod logs, read by the OTel log agent
pub const POD_LOG_DIR: &str = "/var/log/pods";
/// Host directory persisting the OTel log agent's file offsets
pub const LOG_AGENT_STORAGE_DIR: &str = "/var/lib/telemetry-log-agent";
/// Host directory backing the Fluent Bit filesystem buffer
pub const FLUENT_BIT_HOST_DATA_DIR: &str = "/var/telemetry-fluent-bit";

const CONFIG_VOLUME: &str = "config";
const NON_ROOT_USER: i64 = 10001;

/// Requests and limits by component
fn resources(component: &Component) -> ResourceRequirements {
    let (cpu_request, memory_request, memory_limit) = match (component.kind, component.signal) {
        (ComponentKind::Gateway, Signal::Metrics) => ("25m", "32Mi", "512Mi"),
        (ComponentKind::Gateway, _) => ("100m", "32Mi", "500Mi"),
        (ComponentKind::Agent, Signal::Logs) => ("10m", "50Mi", "1200Mi"),
        (ComponentKind::Agent, _) => ("15m", "50Mi", "1200Mi"),
        (ComponentKind::FluentBit, _) => ("100m", "50Mi", "1Gi"),
    };
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu_request.to_string())),
            ("memory".to_string(), Quantity(memory_request.to_string())),
        ])),
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity(memory_limit.to_string()),
        )])),
        ..Default::default()
    }
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
        value: None,
    }
}

fn port(name: &str, number: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: number,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn http_probe(path: &str, number: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(number),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn host_path(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}

/// Log shippers read host log files and therefore run as root; everything
/// else runs as an unprivileged user
fn security_context(component: &Component) -> SecurityContext {
    let reads_host_logs = matches!(
        (component.kind, component.signal),
        (ComponentKind::FluentBit, _) | (ComponentKind::Agent, Signal::Logs)
    );
    SecurityContext {
        allow_privilege_escalation: Some(false),
        privileged: Some(false),
        read_only_root_filesystem: Some(true),
        run_as_non_root: Some(!reads_host_logs),
        run_as_user: Some(if reads_host_logs { 0 } else { NON_ROOT_USER }),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: reads_host_logs.then(|| vec!["FOWNER".to_string()]),
        }),
        ..Default::default()
    }
}

fn env_from(component: &Component) -> Vec<EnvFromSource> {
    vec![EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: component.env_secret_name(),
            optional: Some(true),
        }),
        ..Default::default()
    }]
}

fn collector_container(component: &Component, image: &str) -> Container {
    let mut ports = Vec::new();
    if component.kind == ComponentKind::Gateway {
        ports.push(port("grpc-collector", OTLP_GRPC_PORT));
        ports.push(port("http-collector", OTLP_HTTP_PORT));
    }
    ports.push(port("http-metrics", METRICS_PORT));

    let mut volume_mounts = vec![mount(CONFIG_VOLUME, COLLECTOR_CONFIG_DIR, true)];
    if component.kind == ComponentKind::Agent && component.signal == Signal::Logs {
        volume_mounts.push(mount("varlogpods", POD_LOG_DIR, true));
        volume_mounts.push(mount("varlibtelemetrylogagent", LOG_AGENT_STORAGE_DIR, false));
    }

    Container {
        name: "collector".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![format!(
            "--config={}/{}",
            COLLECTOR_CONFIG_DIR, COLLECTOR_CONFIG_KEY
        )]),
        env: Some(vec![
            field_env("MY_POD_IP", "status.podIP"),
            field_env("MY_NODE_NAME", "spec.nodeName"),
        ]),
        env_from: Some(env_from(component)),
        ports: Some(ports),
        liveness_probe: Some(http_probe("/", HEALTH_CHECK_PORT)),
        readiness_probe: Some(http_probe("/", HEALTH_CHECK_PORT)),
        resources: Some(resources(component)),
        security_context: Some(security_context(component)),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn fluent_bit_container(component: &Component, image: &str) -> Container {
    Container {
        name: "fluent-bit".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            "--workdir=/fluent-bit/etc".to_string(),
            format!("--config={}/{}", CONFIG_DIR, MAIN_CONFIG),
        ]),
        env_from: Some(env_from(component)),
        ports: Some(vec![port("http", FLUENT_BIT_HTTP_PORT)]),
        liveness_probe: Some(http_probe("/", FLUENT_BIT_HTTP_PORT)),
        readiness_probe: Some(http_probe("/api/v1/health", FLUENT_BIT_HTTP_PORT)),
        resources: Some(resources(component)),
        security_context: Some(security_context(component)),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, CONFIG_DIR, true),
            mount("output-tls-config", TLS_DIR, true),
            mount("varlog", "/var/log", true),
            mount("data", DATA_DIR, false),
        ]),
        ..Default::default()
    }
}

fn volumes(component: &Component) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: component.name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }];
    match (component.kind, component.signal) {
        (ComponentKind::FluentBit, _) => {
            volumes.push(Volume {
                name: "output-tls-config".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: component.tls_secret_name(),
                    optional: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            });
            volumes.push(host_path("varlog", "/var/log", None));
            volumes.push(host_path("data", FLUENT_BIT_HOST_DATA_DIR, Some("DirectoryOrCreate")));
        }
        (ComponentKind::Agent, Signal::Logs) => {
            volumes.push(host_path("varlogpods", POD_LOG_DIR, None));
            volumes.push(host_path(
                "varlibtelemetrylogagent",
                LOG_AGENT_STORAGE_DIR,
                Some("DirectoryOrCreate"),
            ));
        }
        _ => {}
    }
    volumes
}

/// Spread gateway replicas across nodes and zones
fn gateway_affinity(name: &str) -> Affinity {
    let term = |topology_key: &str| WeightedPodAffinityTerm {
        weight: 100,
        pod_affinity_term: PodAffinityTerm {
            topology_key: topology_key.to_string(),
            label_selector: Some(LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            }),
            ..Default::default()
        },
    };
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                term("kubernetes.io/hostname"),
                term("topology.kubernetes.io/zone"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod template shared by Deployments and DaemonSets
pub fn pod_template(inputs: &ComponentInputs<'_>) -> PodTemplateSpec {
    let component = &inputs.component;
    let container = match component.kind {
        ComponentKind::FluentBit => fluent_bit_container(component, inputs.image),
        _ => collector_container(component, inputs.image),
    };
    let annotations = BTreeMap::from([
        (
            CHECKSUM_ANNOTATION.to_string(),
            inputs.rendered.checksum.clone(),
        ),
        (ISTIO_INJECT_ANNOTATION.to_string(), "false".to_string()),
    ]);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels(&component.name)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(component.name.clone()),
            priority_class_name: Some(component.priority_class().to_string()),
            containers: vec![container],
            volumes: Some(volumes(component)),
            affinity: (component.kind == ComponentKind::Gateway)
                .then(|| gateway_affinity(&component.name)),
            tolerations: component.is_daemon_set().then(|| {
                vec![Toleration {
                    operator: Some("Exists".to_string()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }),
    }
}

/// Gateway Deployment
pub fn deployment(inputs: &ComponentInputs<'_>) -> Deployment {
    let name = &inputs.component.name;
    Deployment {
        metadata: object_meta(name, Some(inputs.namespace), &inputs.owners),
        spec: Some(DeploymentSpec {
            replicas: Some(inputs.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: pod_template(inputs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Agent or Fluent Bit DaemonSet
pub fn daemon_set(inputs: &ComponentInputs<'_>) -> DaemonSet {
    let name = &inputs.component.name;
    DaemonSet {
        metadata: object_meta(name, Some(inputs.namespace), &inputs.owners),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: pod_template(inputs),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderedConfig;
    use crate::resources::tests::inputs;
    use crate::resources::{PRIORITY_CLASS, PRIORITY_CLASS_HIGH};

    fn pod_annotations(template: &PodTemplateSpec) -> BTreeMap<String, String> {
        template.metadata.clone().unwrap().annotations.unwrap()
    }

    // =========================================================================
    // Story Tests: Pod template
    // =========================================================================

    #[test]
    fn story_pod_template_carries_checksum_and_istio_opt_out() {
        let rendered = RenderedConfig::collector("a".into(), BTreeMap::new());
        let template = pod_template(&inputs(Component::gateway(Signal::Traces), &rendered));

        let annotations = pod_annotations(&template);
        assert_eq!(annotations[CHECKSUM_ANNOTATION], rendered.checksum);
        assert_eq!(annotations[ISTIO_INJECT_ANNOTATION], "false");
        let spec = template.spec.unwrap();
        assert_eq!(spec.priority_class_name.as_deref(), Some(PRIORITY_CLASS));
        assert_eq!(spec.service_account_name.as_deref(), Some("telemetry-trace-gateway"));
        assert!(spec.affinity.is_some());
        assert!(spec.tolerations.is_none());
    }

    #[test]
    fn story_changed_config_changes_checksum() {
        let before = RenderedConfig::collector("a".into(), BTreeMap::new());
        let after = RenderedConfig::collector("b".into(), BTreeMap::new());
        let component = Component::gateway(Signal::Metrics);
        let a = pod_annotations(&pod_template(&inputs(component.clone(), &before)));
        let b = pod_annotations(&pod_template(&inputs(component, &after)));
        assert_ne!(a[CHECKSUM_ANNOTATION], b[CHECKSUM_ANNOTATION]);
    }

    #[test]
    fn story_collector_reads_relay_conf_and_env_secret() {
        let rendered = RenderedConfig::default();
        let template = pod_template(&inputs(Component::gateway(Signal::Traces), &rendered));
        let container = &template.spec.unwrap().containers[0];

        assert_eq!(container.args.as_ref().unwrap()[0], "--config=/conf/relay.conf");
        let env_from = &container.env_from.as_ref().unwrap()[0];
        assert_eq!(
            env_from.secret_ref.as_ref().unwrap().name,
            "telemetry-trace-gateway"
        );
        let env: Vec<_> = container.env.as_ref().unwrap().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(env, vec!["MY_POD_IP", "MY_NODE_NAME"]);
    }

    // =========================================================================
    // Story Tests: Workloads
    // =========================================================================

    #[test]
    fn story_deployment_uses_requested_replicas() {
        let rendered = RenderedConfig::default();
        let mut i = inputs(Component::gateway(Signal::Metrics), &rendered);
        i.replicas = 4;
        let deployment = deployment(&i);
        assert_eq!(deployment.spec.unwrap().replicas, Some(4));
    }

    #[test]
    fn story_log_agent_mounts_pod_logs_with_high_priority() {
        let rendered = RenderedConfig::default();
        let ds = daemon_set(&inputs(Component::agent(Signal::Logs).unwrap(), &rendered));
        let spec = ds.spec.unwrap().template.spec.unwrap();

        assert_eq!(spec.priority_class_name.as_deref(), Some(PRIORITY_CLASS_HIGH));
        assert!(spec.tolerations.is_some());
        let volumes: Vec<_> = spec.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert!(volumes.contains(&"varlogpods".to_string()));
    }

    #[test]
    fn story_fluent_bit_mounts_config_and_tls() {
        let rendered = RenderedConfig::default();
        let ds = daemon_set(&inputs(Component::fluent_bit(), &rendered));
        let spec = ds.spec.unwrap().template.spec.unwrap();
        let container = &spec.containers[0];

        assert_eq!(container.name, "fluent-bit");
        let mounts: Vec<_> = container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert!(mounts.contains(&CONFIG_DIR));
        assert!(mounts.contains(&TLS_DIR));
        let tls = spec
            .volumes
            .unwrap()
            .into_iter()
            .find(|v| v.name == "output-tls-config")
            .unwrap();
        assert_eq!(
            tls.secret.unwrap().secret_name.as_deref(),
            Some("telemetry-fluent-bit-output-tls-config")
        );
    }
}
