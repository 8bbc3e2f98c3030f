//! Kubernetes Events emitted on pipelines and the module resource.
//!
//! Publishing is fire-and-forget: a failed Event is logged and dropped so
//! that it can never fail a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Sink for Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by the kube-rs event recorder
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every Event; used in tests
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Pipeline configuration merged into the collector config
    pub const CONFIGURATION_GENERATED: &str = "ConfigurationGenerated";
    /// Pipeline rejected by reconcile-time validation
    pub const CONFIGURATION_REJECTED: &str = "ConfigurationRejected";
    /// Pipeline left out because the per-signal cap is reached
    pub const MAX_PIPELINES_EXCEEDED: &str = "MaxPipelinesExceeded";
    /// Shared workloads removed after the last pipeline went away
    pub const COMPONENTS_REMOVED: &str = "ComponentsRemoved";
    /// Reconcile exceeded its deadline
    pub const RECONCILE_TIMEOUT: &str = "ReconcileTimeout";
    /// Module deletion blocked by existing pipelines
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
}

/// Event actions shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Regular reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Validation of a pipeline spec
    pub const VALIDATE: &str = "Validate";
    /// Removal of shared workloads
    pub const CLEANUP: &str = "Cleanup";
}
