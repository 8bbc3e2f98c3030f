//! Settings consumed by the reconcilers

use std::time::Duration;

use telemetry_common::DEFAULT_TARGET_NAMESPACE;

/// Default OpenTelemetry Collector image
pub const DEFAULT_COLLECTOR_IMAGE: &str =
    "europe-docker.pkg.dev/kyma-project/prod/kyma-otel-collector:0.111.0-main";

/// Default Fluent Bit image
pub const DEFAULT_FLUENT_BIT_IMAGE: &str =
    "europe-docker.pkg.dev/kyma-project/prod/external/fluent/fluent-bit:3.1.9";

/// Reconciler settings, resolved once at startup
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Namespace holding every derived workload
    pub target_namespace: String,
    /// Collector image for gateways and agents
    pub collector_image: String,
    /// Fluent Bit image
    pub fluent_bit_image: String,
    /// Deadline for a single reconcile pass
    pub reconcile_timeout: Duration,
    /// Certificates expiring within this horizon are flagged
    pub tls_expiry_warning: Duration,
    /// Self-monitor alerts older than this are ignored
    pub alert_window: Duration,
    /// Requeue interval of healthy pipelines
    pub resync_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            target_namespace: DEFAULT_TARGET_NAMESPACE.to_string(),
            collector_image: DEFAULT_COLLECTOR_IMAGE.to_string(),
            fluent_bit_image: DEFAULT_FLUENT_BIT_IMAGE.to_string(),
            reconcile_timeout: Duration::from_secs(60),
            tls_expiry_warning: Duration::from_secs(14 * 24 * 3600),
            alert_window: Duration::from_secs(300),
            resync_interval: Duration::from_secs(60),
        }
    }
}
