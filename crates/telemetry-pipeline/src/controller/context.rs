//! Shared state of the pipeline and module reconcilers

use std::sync::Arc;

use kube::Client;

use telemetry_common::retry::FailureBackoff;
use telemetry_common::{EventPublisher, KubeEventPublisher};
#[cfg(test)]
use telemetry_common::NoopEventPublisher;

use super::client::{TelemetryKubeClient, TelemetryKubeClientImpl};
use crate::config::ReconcilerConfig;
use crate::lock::RenderGates;
use crate::secrets::{KubeSecretReader, SecretReader, SecretWatchSet};
use crate::selfmon::AlertStore;
use crate::tls::TlsEvaluator;

/// Controller context shared by every reconcile of every signal
///
/// Holds the clients plus the coordination state that must outlive a
/// single reconcile: render gates, the secret watch set, the firing
/// self-monitor alerts and the failure backoff.
pub struct PipelineContext {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn TelemetryKubeClient>,
    /// Secret access for value resolution
    pub secrets: Arc<dyn SecretReader>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Namespace, images and deadlines
    pub config: ReconcilerConfig,
    /// Per-signal render serialization
    pub gates: RenderGates,
    /// Secrets read by each pipeline
    pub secret_watch: SecretWatchSet,
    /// Alerts pushed by the self-monitor
    pub alerts: Arc<AlertStore>,
    /// Certificate classification
    pub tls: TlsEvaluator,
    /// Requeue delays of failing reconciles
    pub backoff: FailureBackoff,
}

impl PipelineContext {
    /// Create a context from its collaborators
    pub fn new(
        kube: Arc<dyn TelemetryKubeClient>,
        secrets: Arc<dyn SecretReader>,
        events: Arc<dyn EventPublisher>,
        config: ReconcilerConfig,
        alerts: Arc<AlertStore>,
    ) -> Self {
        let tls = TlsEvaluator::new(config.tls_expiry_warning);
        Self {
            kube,
            secrets,
            events,
            config,
            gates: RenderGates::new(),
            secret_watch: SecretWatchSet::new(),
            alerts,
            tls,
            backoff: FailureBackoff::default(),
        }
    }

    /// Create a context backed by the API server
    pub fn from_client(client: Client, config: ReconcilerConfig, alerts: Arc<AlertStore>) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), "telemetry-manager"));
        Self::new(
            Arc::new(TelemetryKubeClientImpl::new(client.clone())),
            Arc::new(KubeSecretReader::new(client)),
            events,
            config,
            alerts,
        )
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn TelemetryKubeClient>, secrets: Arc<dyn SecretReader>) -> Self {
        let config = ReconcilerConfig::default();
        let alerts = Arc::new(AlertStore::new(config.alert_window));
        Self::new(kube, secrets, Arc::new(NoopEventPublisher), config, alerts)
    }
}
