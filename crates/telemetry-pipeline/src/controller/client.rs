//! Cluster access used by the reconcilers
//!
//! Everything the controllers read or write goes through
//! [`TelemetryKubeClient`] so that reconcile logic can be driven by a mock.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use telemetry_common::kube_utils::{delete_ignore_not_found, ApplyBatch};
use telemetry_common::FIELD_MANAGER;

use crate::crd::{
    LogParser, LogPipeline, LogPipelineStatus, MetricPipeline, MetricPipelineStatus, Telemetry,
    TelemetryStatus, TracePipeline, TracePipelineStatus,
};
use crate::resources::{Component, ComponentSet};
use crate::Error;

/// Finalizer holding the module until no pipeline or parser is left
pub const MODULE_FINALIZER: &str = "telemetry.kyma-project.io/finalizer";

/// Trait abstracting the cluster operations of the telemetry reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TelemetryKubeClient: Send + Sync {
    /// List all TracePipelines
    async fn list_trace_pipelines(&self) -> Result<Vec<TracePipeline>, Error>;

    /// List all MetricPipelines
    async fn list_metric_pipelines(&self) -> Result<Vec<MetricPipeline>, Error>;

    /// List all LogPipelines
    async fn list_log_pipelines(&self) -> Result<Vec<LogPipeline>, Error>;

    /// List all LogParsers
    async fn list_log_parsers(&self) -> Result<Vec<LogParser>, Error>;

    /// List the Telemetry resources of `namespace`
    async fn list_telemetries(&self, namespace: &str) -> Result<Vec<Telemetry>, Error>;

    /// Patch the status of a TracePipeline
    async fn patch_trace_pipeline_status(
        &self,
        name: &str,
        status: &TracePipelineStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a MetricPipeline
    async fn patch_metric_pipeline_status(
        &self,
        name: &str,
        status: &MetricPipelineStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a LogPipeline
    async fn patch_log_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a Telemetry resource
    async fn patch_telemetry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TelemetryStatus,
    ) -> Result<(), Error>;

    /// Add or remove the module finalizer
    async fn set_telemetry_finalizer(
        &self,
        name: &str,
        namespace: &str,
        present: bool,
    ) -> Result<(), Error>;

    /// Server-side apply every object of a component
    async fn apply_component_set(&self, set: &ComponentSet) -> Result<(), Error>;

    /// Delete every object a component may own; returns how many existed
    async fn delete_component(&self, component: &Component, namespace: &str)
        -> Result<usize, Error>;

    /// Get a Deployment, `None` when absent
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Get a DaemonSet, `None` when absent
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, Error>;

    /// Whether a Service exists
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// List the pods of `namespace` matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;
}

/// Real Kubernetes client implementation
pub struct TelemetryKubeClientImpl {
    client: Client,
}

impl TelemetryKubeClientImpl {
    /// Wrap `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_all<K>(&self) -> Result<Vec<K>, Error>
    where
        K: Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn patch_cluster_status<K>(&self, name: &str, status: &impl Serialize) -> Result<(), Error>
    where
        K: Resource<DynamicType = ()> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn get_namespaced<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Queue `obj` on `batch` under its own kind, name and namespace
fn push<K>(batch: &mut ApplyBatch<'_>, obj: &K) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let ar = ApiResource::erase::<K>(&());
    let namespace = obj.namespace();
    batch.push(&ar.kind, &obj.name_any(), namespace.as_deref(), obj, &ar)
}

#[async_trait]
impl TelemetryKubeClient for TelemetryKubeClientImpl {
    async fn list_trace_pipelines(&self) -> Result<Vec<TracePipeline>, Error> {
        self.list_all().await
    }

    async fn list_metric_pipelines(&self) -> Result<Vec<MetricPipeline>, Error> {
        self.list_all().await
    }

    async fn list_log_pipelines(&self) -> Result<Vec<LogPipeline>, Error> {
        self.list_all().await
    }

    async fn list_log_parsers(&self) -> Result<Vec<LogParser>, Error> {
        self.list_all().await
    }

    async fn list_telemetries(&self, namespace: &str) -> Result<Vec<Telemetry>, Error> {
        let api: Api<Telemetry> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn patch_trace_pipeline_status(
        &self,
        name: &str,
        status: &TracePipelineStatus,
    ) -> Result<(), Error> {
        self.patch_cluster_status::<TracePipeline>(name, status).await
    }

    async fn patch_metric_pipeline_status(
        &self,
        name: &str,
        status: &MetricPipelineStatus,
    ) -> Result<(), Error> {
        self.patch_cluster_status::<MetricPipeline>(name, status).await
    }

    async fn patch_log_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error> {
        self.patch_cluster_status::<LogPipeline>(name, status).await
    }

    async fn patch_telemetry_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TelemetryStatus,
    ) -> Result<(), Error> {
        let api: Api<Telemetry> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn set_telemetry_finalizer(
        &self,
        name: &str,
        namespace: &str,
        present: bool,
    ) -> Result<(), Error> {
        let api: Api<Telemetry> = Api::namespaced(self.client.clone(), namespace);
        let Some(module) = api.get_opt(name).await? else {
            return Ok(());
        };
        let mut finalizers: Vec<String> = module
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != MODULE_FINALIZER)
            .cloned()
            .collect();
        if present {
            finalizers.push(MODULE_FINALIZER.to_string());
        }
        // The resource version guards against dropping a concurrently added finalizer.
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": module.resource_version(),
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(module = %name, present, "updated module finalizer");
        Ok(())
    }

    async fn apply_component_set(&self, set: &ComponentSet) -> Result<(), Error> {
        let params = PatchParams::apply(FIELD_MANAGER).force();

        // ── Layer 1: everything the workload mounts or runs as ──
        let mut layer1 = ApplyBatch::new(self.client.clone(), &params);
        push(&mut layer1, &set.service_account)?;
        push(&mut layer1, &set.cluster_role)?;
        push(&mut layer1, &set.cluster_role_binding)?;
        if let Some(role) = &set.role {
            push(&mut layer1, role)?;
        }
        if let Some(binding) = &set.role_binding {
            push(&mut layer1, binding)?;
        }
        push(&mut layer1, &set.config_map)?;
        push(&mut layer1, &set.env_secret)?;
        if let Some(tls) = &set.tls_secret {
            push(&mut layer1, tls)?;
        }
        for service in &set.services {
            push(&mut layer1, service)?;
        }
        push(&mut layer1, &set.network_policy)?;
        let layer1_count = layer1.run("configuration").await?;

        // ── Layer 2: the workload, whose checksum ties it to layer 1 ──
        let mut layer2 = ApplyBatch::new(self.client.clone(), &params);
        if let Some(deployment) = &set.deployment {
            push(&mut layer2, deployment)?;
        }
        if let Some(daemon_set) = &set.daemon_set {
            push(&mut layer2, daemon_set)?;
        }
        let layer2_count = layer2.run("workload").await?;

        info!(
            component = %set.component.name,
            resources = layer1_count + layer2_count,
            checksum = set.checksum().unwrap_or_default(),
            "applied component"
        );
        Ok(())
    }

    async fn delete_component(
        &self,
        component: &Component,
        namespace: &str,
    ) -> Result<usize, Error> {
        let mut deleted = 0;
        for key in component.object_keys(namespace) {
            if delete_ignore_not_found(
                self.client.clone(),
                &key.api_resource,
                &key.name,
                key.namespace.as_deref(),
            )
            .await?
            {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(component = %component.name, deleted, "removed component");
        }
        Ok(deleted)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self
            .get_namespaced::<Service>(namespace, name)
            .await?
            .is_some())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }
}
