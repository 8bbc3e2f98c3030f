//! Operator settings from flags and environment

use std::time::Duration;

use clap::Args;

use telemetry_common::DEFAULT_TARGET_NAMESPACE;
use telemetry_pipeline::config::{DEFAULT_COLLECTOR_IMAGE, DEFAULT_FLUENT_BIT_IMAGE};
use telemetry_pipeline::ReconcilerConfig;

/// Flags of the `controller` subcommand
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Namespace holding the gateways, agents and the Telemetry module
    #[arg(long, env = "TARGET_NAMESPACE", default_value = DEFAULT_TARGET_NAMESPACE)]
    pub target_namespace: String,

    /// OpenTelemetry Collector image for gateways and agents
    #[arg(long, env = "COLLECTOR_IMAGE", default_value = DEFAULT_COLLECTOR_IMAGE)]
    pub collector_image: String,

    /// Fluent Bit image for FluentBit-mode log pipelines
    #[arg(long, env = "FLUENT_BIT_IMAGE", default_value = DEFAULT_FLUENT_BIT_IMAGE)]
    pub fluent_bit_image: String,

    /// Deadline of a single pipeline reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 60)]
    pub reconcile_timeout_secs: u64,

    /// Certificates expiring within this many days are flagged
    #[arg(long, env = "TLS_EXPIRY_WARNING_DAYS", default_value_t = 14)]
    pub tls_expiry_warning_days: u64,

    /// Self-monitor alerts older than this many seconds are ignored
    #[arg(long, env = "ALERT_WINDOW_SECS", default_value_t = 300)]
    pub alert_window_secs: u64,

    /// Requeue interval of healthy pipelines, in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 60)]
    pub resync_interval_secs: u64,

    /// Port of the validating admission webhook
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    pub webhook_port: u16,

    /// Port of the self-monitor alert receiver
    #[arg(long, env = "SELF_MONITOR_PORT", default_value_t = 9090)]
    pub self_monitor_port: u16,

    /// Service fronting the admission webhook
    #[arg(long, env = "WEBHOOK_SERVICE_NAME", default_value = "telemetry-manager-webhook")]
    pub webhook_service_name: String,
}

/// Resolved operator settings
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Settings handed to the reconcilers
    pub reconciler: ReconcilerConfig,
    /// Admission webhook port
    pub webhook_port: u16,
    /// Alert receiver port
    pub self_monitor_port: u16,
    /// Admission webhook Service name
    pub webhook_service_name: String,
}

impl OperatorConfig {
    /// Namespace the operator works in
    pub fn namespace(&self) -> &str {
        &self.reconciler.target_namespace
    }
}

impl From<ControllerArgs> for OperatorConfig {
    fn from(args: ControllerArgs) -> Self {
        Self {
            reconciler: ReconcilerConfig {
                target_namespace: args.target_namespace,
                collector_image: args.collector_image,
                fluent_bit_image: args.fluent_bit_image,
                reconcile_timeout: Duration::from_secs(args.reconcile_timeout_secs),
                tls_expiry_warning: Duration::from_secs(args.tls_expiry_warning_days * 24 * 3600),
                alert_window: Duration::from_secs(args.alert_window_secs),
                resync_interval: Duration::from_secs(args.resync_interval_secs),
            },
            webhook_port: args.webhook_port,
            self_monitor_port: args.self_monitor_port,
            webhook_service_name: args.webhook_service_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ControllerArgs,
    }

    #[test]
    fn defaults_match_reconciler_defaults() {
        let cli = TestCli::try_parse_from(["telemetry-manager"]).unwrap();
        let config = OperatorConfig::from(cli.args);
        let defaults = ReconcilerConfig::default();

        assert_eq!(config.namespace(), "kyma-system");
        assert_eq!(config.reconciler.reconcile_timeout, defaults.reconcile_timeout);
        assert_eq!(config.reconciler.tls_expiry_warning, defaults.tls_expiry_warning);
        assert_eq!(config.reconciler.alert_window, defaults.alert_window);
        assert_eq!(config.webhook_port, 9443);
        assert_eq!(config.self_monitor_port, 9090);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "telemetry-manager",
            "--target-namespace",
            "observability",
            "--tls-expiry-warning-days",
            "30",
            "--reconcile-timeout-secs",
            "10",
        ])
        .unwrap();
        let config = OperatorConfig::from(cli.args);

        assert_eq!(config.namespace(), "observability");
        assert_eq!(config.reconciler.tls_expiry_warning, Duration::from_secs(30 * 24 * 3600));
        assert_eq!(config.reconciler.reconcile_timeout, Duration::from_secs(10));
    }
}
