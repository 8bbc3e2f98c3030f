//! Kubernetes objects derived from the rendered configuration
//!
//! Every signal is served by one or more shared components (a gateway
//! Deployment, an agent DaemonSet, or the Fluent Bit DaemonSet). For each
//! component this module builds the full object set from typed
//! `k8s-openapi` structs: ServiceAccount, RBAC, ConfigMap, env Secret,
//! Services, NetworkPolicy and the workload itself. The objects carry a
//! non-controller owner reference to every admitted pipeline of the signal,
//! so the last pipeline's deletion garbage-collects them.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};

use crate::render::RenderedConfig;
use crate::signal::{Signal, FLUENT_BIT_NAME};
use telemetry_common::{MANAGED_BY_LABEL, NAME_LABEL, PART_OF_LABEL};

pub mod network_policy;
pub mod rbac;
pub mod scaling;
pub mod service;
pub mod workload;

pub use scaling::gateway_replicas;

/// Pod annotation carrying the configuration checksum
pub const CHECKSUM_ANNOTATION: &str = "checksum/config";
/// Pod annotation opting out of Istio sidecar injection
pub const ISTIO_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";
/// Priority class of gateways and the metric agent
pub const PRIORITY_CLASS: &str = "telemetry-priority-class";
/// Priority class of the log shippers
pub const PRIORITY_CLASS_HIGH: &str = "telemetry-priority-class-high";

/// Shape of a shared component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// OTel Collector Deployment behind the OTLP push Service
    Gateway,
    /// OTel Collector DaemonSet
    Agent,
    /// Fluent Bit DaemonSet
    FluentBit,
}

/// One shared workload and the name every satellite object is derived from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    /// Object name (`telemetry-trace-gateway`, ...)
    pub name: String,
    /// Signal the component serves
    pub signal: Signal,
    /// Workload shape
    pub kind: ComponentKind,
}

impl Component {
    /// The gateway of `signal`
    pub fn gateway(signal: Signal) -> Self {
        Self {
            name: signal.gateway_name(),
            signal,
            kind: ComponentKind::Gateway,
        }
    }

    /// The agent of `signal`, for signals that have one
    pub fn agent(signal: Signal) -> Option<Self> {
        signal.agent_name().map(|name| Self {
            name,
            signal,
            kind: ComponentKind::Agent,
        })
    }

    /// The Fluent Bit log shipper
    pub fn fluent_bit() -> Self {
        Self {
            name: FLUENT_BIT_NAME.to_string(),
            signal: Signal::Logs,
            kind: ComponentKind::FluentBit,
        }
    }

    /// Every component a signal can run
    pub fn all_for(signal: Signal) -> Vec<Self> {
        let mut components = vec![Self::gateway(signal)];
        components.extend(Self::agent(signal));
        if signal == Signal::Logs {
            components.push(Self::fluent_bit());
        }
        components
    }

    /// True for DaemonSet-backed components
    pub fn is_daemon_set(&self) -> bool {
        self.kind != ComponentKind::Gateway
    }

    /// Priority class of the pod template
    pub fn priority_class(&self) -> &'static str {
        match (self.kind, self.signal) {
            (ComponentKind::FluentBit, _) | (ComponentKind::Agent, Signal::Logs) => {
                PRIORITY_CLASS_HIGH
            }
            _ => PRIORITY_CLASS,
        }
    }

    /// Name of the Secret exposed as environment variables
    pub fn env_secret_name(&self) -> String {
        match self.kind {
            ComponentKind::FluentBit => format!("{}-env", self.name),
            _ => self.name.clone(),
        }
    }

    /// Name of the Secret holding mounted TLS material (Fluent Bit only)
    pub fn tls_secret_name(&self) -> Option<String> {
        (self.kind == ComponentKind::FluentBit)
            .then(|| format!("{}-output-tls-config", self.name))
    }

    /// Name of the self-monitor scrape Service
    pub fn metrics_service_name(&self) -> String {
        format!("{}-metrics", self.name)
    }

    /// Name of the OTLP push Service (gateways only)
    pub fn otlp_service_name(&self) -> Option<String> {
        (self.kind == ComponentKind::Gateway).then(|| self.signal.otlp_service_name())
    }

    /// True when the component needs a namespaced Role for leader leases
    pub fn needs_lease_role(&self) -> bool {
        self.signal == Signal::Metrics && self.kind != ComponentKind::FluentBit
    }
}

/// Standard labels carried by every derived object
pub fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), name.to_string()),
        (MANAGED_BY_LABEL.to_string(), "telemetry-manager".to_string()),
        (PART_OF_LABEL.to_string(), "telemetry".to_string()),
    ])
}

/// Pod selector of a component; a subset of [`labels`] so it never changes
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(NAME_LABEL.to_string(), name.to_string())])
}

/// Non-controller owner reference to `owner`, or `None` before it has a uid
pub fn owner_reference<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    Some(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.uid()?,
        controller: Some(false),
        block_owner_deletion: Some(false),
    })
}

/// Owner references for a set of pipelines, sorted by name
pub fn owner_references<K>(owners: &[&K]) -> Vec<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let mut refs: Vec<OwnerReference> = owners.iter().filter_map(|o| owner_reference(*o)).collect();
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    refs
}

pub(crate) fn object_meta(
    name: &str,
    namespace: Option<&str>,
    owners: &[OwnerReference],
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(labels(name)),
        owner_references: (!owners.is_empty()).then(|| owners.to_vec()),
        ..Default::default()
    }
}

fn byte_map(values: &BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    values
        .iter()
        .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
        .collect()
}

/// Inputs of [`ComponentSet::build`]
#[derive(Clone, Debug)]
pub struct ComponentInputs<'a> {
    /// Component to build
    pub component: Component,
    /// Namespace every namespaced object lands in
    pub namespace: &'a str,
    /// Container image
    pub image: &'a str,
    /// Rendered configuration and environment
    pub rendered: &'a RenderedConfig,
    /// Owner references of every contributing pipeline
    pub owners: Vec<OwnerReference>,
    /// Gateway replica count; ignored for DaemonSets
    pub replicas: i32,
}

/// All objects of one component, ready to apply
#[derive(Clone, Debug)]
pub struct ComponentSet {
    /// The component these objects belong to
    pub component: Component,
    /// Workload identity
    pub service_account: ServiceAccount,
    /// Cluster-wide read permissions
    pub cluster_role: ClusterRole,
    /// Binds the ClusterRole to the ServiceAccount
    pub cluster_role_binding: ClusterRoleBinding,
    /// Lease permissions for singleton receivers
    pub role: Option<Role>,
    /// Binds the Role to the ServiceAccount
    pub role_binding: Option<RoleBinding>,
    /// Rendered configuration files
    pub config_map: ConfigMap,
    /// Environment bindings
    pub env_secret: Secret,
    /// Mounted TLS material
    pub tls_secret: Option<Secret>,
    /// OTLP push and metrics Services
    pub services: Vec<Service>,
    /// Ingress restrictions
    pub network_policy: NetworkPolicy,
    /// Gateway workload
    pub deployment: Option<Deployment>,
    /// Agent workload
    pub daemon_set: Option<DaemonSet>,
}

impl ComponentSet {
    /// Build every object of `inputs.component`
    pub fn build(inputs: &ComponentInputs<'_>) -> Self {
        let component = &inputs.component;
        let ns = Some(inputs.namespace);
        let owners = inputs.owners.as_slice();

        let mut config_map = ConfigMap {
            metadata: object_meta(&component.name, ns, owners),
            data: Some(inputs.rendered.files.clone()),
            ..Default::default()
        };
        if config_map.data.as_ref().is_some_and(BTreeMap::is_empty) {
            config_map.data = None;
        }

        let env_secret = Secret {
            metadata: object_meta(&component.env_secret_name(), ns, owners),
            data: Some(byte_map(&inputs.rendered.env)),
            ..Default::default()
        };

        let tls_secret = component.tls_secret_name().map(|name| Secret {
            metadata: object_meta(&name, ns, owners),
            data: Some(byte_map(&inputs.rendered.secret_files)),
            ..Default::default()
        });

        let (role, role_binding) = if component.needs_lease_role() {
            (
                Some(rbac::lease_role(component, inputs.namespace, owners)),
                Some(rbac::lease_role_binding(component, inputs.namespace, owners)),
            )
        } else {
            (None, None)
        };

        let mut services = Vec::new();
        if component.kind == ComponentKind::Gateway {
            services.push(service::otlp_service(component, inputs.namespace, owners));
        }
        services.push(service::metrics_service(component, inputs.namespace, owners));

        let (deployment, daemon_set) = if component.is_daemon_set() {
            (None, Some(workload::daemon_set(inputs)))
        } else {
            (Some(workload::deployment(inputs)), None)
        };

        Self {
            component: component.clone(),
            service_account: ServiceAccount {
                metadata: object_meta(&component.name, ns, owners),
                ..Default::default()
            },
            cluster_role: rbac::cluster_role(component, owners),
            cluster_role_binding: rbac::cluster_role_binding(component, inputs.namespace, owners),
            role,
            role_binding,
            config_map,
            env_secret,
            tls_secret,
            services,
            network_policy: network_policy::network_policy(component, inputs.namespace, owners),
            deployment,
            daemon_set,
        }
    }

    /// Number of objects the set applies
    pub fn object_count(&self) -> usize {
        // service account, cluster role, binding, config map, env secret, network policy, workload
        7 + self.services.len()
            + usize::from(self.role.is_some())
            + usize::from(self.role_binding.is_some())
            + usize::from(self.tls_secret.is_some())
    }

    /// Checksum stamped on the pod template
    pub fn checksum(&self) -> Option<&str> {
        let template = match (&self.deployment, &self.daemon_set) {
            (Some(d), _) => d.spec.as_ref().map(|s| &s.template),
            (_, Some(d)) => d.spec.as_ref().map(|s| &s.template),
            _ => None,
        }?;
        template
            .metadata
            .as_ref()?
            .annotations
            .as_ref()?
            .get(CHECKSUM_ANNOTATION)
            .map(String::as_str)
    }
}

/// Address of one derived object, used for deletion
#[derive(Clone, Debug)]
pub struct ObjectKey {
    /// Group, version and kind
    pub api_resource: ApiResource,
    /// Object name
    pub name: String,
    /// Namespace; `None` for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ObjectKey {
    fn namespaced<K>(name: String, namespace: &str) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_resource: ApiResource::erase::<K>(&()),
            name,
            namespace: Some(namespace.to_string()),
        }
    }

    fn cluster<K>(name: String) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_resource: ApiResource::erase::<K>(&()),
            name,
            namespace: None,
        }
    }
}

impl Component {
    /// Every object the component may own, workload first so pods stop
    /// before their configuration disappears
    pub fn object_keys(&self, namespace: &str) -> Vec<ObjectKey> {
        let mut keys = Vec::new();
        if self.is_daemon_set() {
            keys.push(ObjectKey::namespaced::<DaemonSet>(self.name.clone(), namespace));
        } else {
            keys.push(ObjectKey::namespaced::<Deployment>(self.name.clone(), namespace));
        }
        if let Some(otlp) = self.otlp_service_name() {
            keys.push(ObjectKey::namespaced::<Service>(otlp, namespace));
        }
        keys.push(ObjectKey::namespaced::<Service>(self.metrics_service_name(), namespace));
        keys.push(ObjectKey::namespaced::<NetworkPolicy>(self.name.clone(), namespace));
        keys.push(ObjectKey::namespaced::<ConfigMap>(self.name.clone(), namespace));
        keys.push(ObjectKey::namespaced::<Secret>(self.env_secret_name(), namespace));
        if let Some(tls) = self.tls_secret_name() {
            keys.push(ObjectKey::namespaced::<Secret>(tls, namespace));
        }
        if self.needs_lease_role() {
            keys.push(ObjectKey::namespaced::<RoleBinding>(self.name.clone(), namespace));
            keys.push(ObjectKey::namespaced::<Role>(self.name.clone(), namespace));
        }
        keys.push(ObjectKey::cluster::<ClusterRoleBinding>(self.name.clone()));
        keys.push(ObjectKey::cluster::<ClusterRole>(self.name.clone()));
        keys.push(ObjectKey::namespaced::<ServiceAccount>(self.name.clone(), namespace));
        keys
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::{TracePipeline, TracePipelineSpec};

    pub(crate) fn owned_trace(name: &str, uid: &str) -> TracePipeline {
        let mut p = TracePipeline::new(name, TracePipelineSpec::default());
        p.metadata.uid = Some(uid.to_string());
        p
    }

    pub(crate) fn inputs<'a>(component: Component, rendered: &'a RenderedConfig) -> ComponentInputs<'a> {
        let owner = owned_trace("alpha", "uid-a");
        ComponentInputs {
            component,
            namespace: "kyma-system",
            image: "collector:latest",
            rendered,
            owners: owner_references(&[&owner]),
            replicas: 2,
        }
    }

    // =========================================================================
    // Story Tests: Ownership
    // =========================================================================

    #[test]
    fn story_owner_references_cover_every_pipeline() {
        let b = owned_trace("beta", "uid-b");
        let a = owned_trace("alpha", "uid-a");
        let refs = owner_references(&[&b, &a]);

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "alpha");
        assert_eq!(refs[0].kind, "TracePipeline");
        assert_eq!(refs[0].api_version, "telemetry.kyma-project.io/v1alpha1");
        assert_eq!(refs[0].controller, Some(false));
    }

    #[test]
    fn story_pipeline_without_uid_is_skipped() {
        let fresh = TracePipeline::new("fresh", TracePipelineSpec::default());
        assert!(owner_reference(&fresh).is_none());
    }

    // =========================================================================
    // Story Tests: Component Set
    // =========================================================================

    #[test]
    fn story_gateway_set_has_deployment_and_otlp_service() {
        let rendered = RenderedConfig::collector("receivers: {}".into(), BTreeMap::new());
        let set = ComponentSet::build(&inputs(Component::gateway(Signal::Traces), &rendered));

        assert!(set.deployment.is_some());
        assert!(set.daemon_set.is_none());
        assert!(set.role.is_none());
        let names: Vec<_> = set
            .services
            .iter()
            .filter_map(|s| s.metadata.name.clone())
            .collect();
        assert_eq!(names, vec!["telemetry-otlp-traces", "telemetry-trace-gateway-metrics"]);
        assert_eq!(set.checksum(), Some(rendered.checksum.as_str()));
        assert_eq!(set.object_count(), 9);
    }

    #[test]
    fn story_every_object_carries_owners_and_labels() {
        let rendered = RenderedConfig::collector("receivers: {}".into(), BTreeMap::new());
        let set = ComponentSet::build(&inputs(Component::gateway(Signal::Metrics), &rendered));

        let metas = [
            &set.service_account.metadata,
            &set.cluster_role.metadata,
            &set.cluster_role_binding.metadata,
            &set.config_map.metadata,
            &set.env_secret.metadata,
            &set.network_policy.metadata,
        ];
        for meta in metas {
            let owners = meta.owner_references.as_ref().unwrap();
            assert_eq!(owners[0].uid, "uid-a");
            assert_eq!(
                meta.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
                "telemetry-manager"
            );
        }
        assert!(set.role.is_some());
    }

    #[test]
    fn story_env_secret_holds_rendered_environment() {
        let env = BTreeMap::from([("OTLP_ENDPOINT_A".to_string(), "https://b:4317".to_string())]);
        let rendered = RenderedConfig::collector("x".into(), env);
        let set = ComponentSet::build(&inputs(Component::gateway(Signal::Traces), &rendered));

        let data = set.env_secret.data.unwrap();
        assert_eq!(data["OTLP_ENDPOINT_A"].0, b"https://b:4317".to_vec());
        assert_eq!(set.config_map.data.unwrap()["relay.conf"], "x");
    }

    #[test]
    fn story_fluent_bit_set_mounts_tls_secret() {
        let rendered = RenderedConfig::new(BTreeMap::new(), BTreeMap::new())
            .with_secret_files(BTreeMap::from([("a-cert.crt".to_string(), "PEM".to_string())]));
        let set = ComponentSet::build(&inputs(Component::fluent_bit(), &rendered));

        assert!(set.daemon_set.is_some());
        assert_eq!(
            set.tls_secret.unwrap().metadata.name.as_deref(),
            Some("telemetry-fluent-bit-output-tls-config")
        );
        assert_eq!(
            set.env_secret.metadata.name.as_deref(),
            Some("telemetry-fluent-bit-env")
        );
        assert!(set.config_map.data.is_none());
    }

    // =========================================================================
    // Story Tests: Component naming
    // =========================================================================

    #[test]
    fn story_log_shippers_use_high_priority() {
        assert_eq!(Component::fluent_bit().priority_class(), PRIORITY_CLASS_HIGH);
        assert_eq!(
            Component::agent(Signal::Logs).unwrap().priority_class(),
            PRIORITY_CLASS_HIGH
        );
        assert_eq!(
            Component::agent(Signal::Metrics).unwrap().priority_class(),
            PRIORITY_CLASS
        );
        assert_eq!(Component::gateway(Signal::Logs).priority_class(), PRIORITY_CLASS);
    }

    #[test]
    fn story_signal_components() {
        let names: Vec<_> = Component::all_for(Signal::Logs)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(
            names,
            vec!["telemetry-log-gateway", "telemetry-log-agent", "telemetry-fluent-bit"]
        );
        assert_eq!(Component::all_for(Signal::Traces).len(), 1);
    }

    #[test]
    fn story_object_keys_cover_built_objects() {
        let component = Component::gateway(Signal::Metrics);
        let keys = component.object_keys("kyma-system");
        assert_eq!(keys[0].api_resource.kind, "Deployment");
        assert!(keys.iter().any(|k| k.api_resource.kind == "Role"));
        let cluster: Vec<_> = keys.iter().filter(|k| k.namespace.is_none()).collect();
        assert_eq!(cluster.len(), 2);

        let rendered = RenderedConfig::default();
        let set = ComponentSet::build(&inputs(component, &rendered));
        assert_eq!(keys.len(), set.object_count());
    }
}
