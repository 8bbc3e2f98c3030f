//! Condition types, reason codes and their user-facing messages

use crate::signal::Signal;

/// Pipeline configuration was merged into the collector configuration
pub const TYPE_CONFIGURATION_GENERATED: &str = "ConfigurationGenerated";
/// Gateway Deployment health
pub const TYPE_GATEWAY_HEALTHY: &str = "GatewayHealthy";
/// Agent DaemonSet health
pub const TYPE_AGENT_HEALTHY: &str = "AgentHealthy";
/// Self-monitor verdict on data delivery
pub const TYPE_FLOW_HEALTHY: &str = "TelemetryFlowHealthy";
/// Deprecated pending marker
pub const TYPE_PENDING: &str = "Pending";
/// Deprecated running marker
pub const TYPE_RUNNING: &str = "Running";

/// Prefix of every Pending message
pub const PENDING_DEPRECATION_MSG: &str = "[NOTE: The \"Pending\" type is deprecated] ";
/// Prefix of every Running message
pub const RUNNING_DEPRECATION_MSG: &str = "[NOTE: The \"Running\" type is deprecated] ";

/// Reason codes written into condition `reason` fields
pub mod reasons {
    pub const GATEWAY_CONFIGURED: &str = "GatewayConfigured";
    pub const AGENT_CONFIGURED: &str = "AgentConfigured";
    pub const GATEWAY_READY: &str = "GatewayReady";
    pub const GATEWAY_NOT_READY: &str = "GatewayNotReady";
    pub const AGENT_READY: &str = "AgentReady";
    pub const AGENT_NOT_READY: &str = "AgentNotReady";
    pub const ROLLOUT_IN_PROGRESS: &str = "RolloutInProgress";
    pub const LOG_AGENT_NOT_REQUIRED: &str = "LogAgentNotRequired";
    pub const METRIC_AGENT_NOT_REQUIRED: &str = "MetricAgentNotRequired";
    pub const FLUENT_BIT_DS_READY: &str = "FluentBitDSReady";
    pub const FLUENT_BIT_DS_NOT_READY: &str = "FluentBitDSNotReady";
    pub const TRACE_GATEWAY_DEPLOYMENT_READY: &str = "TraceGatewayDeploymentReady";
    pub const TRACE_GATEWAY_DEPLOYMENT_NOT_READY: &str = "TraceGatewayDeploymentNotReady";
    pub const METRIC_GATEWAY_DEPLOYMENT_READY: &str = "MetricGatewayDeploymentReady";
    pub const METRIC_GATEWAY_DEPLOYMENT_NOT_READY: &str = "MetricGatewayDeploymentNotReady";
    pub const METRIC_AGENT_DAEMONSET_NOT_READY: &str = "MetricAgentDaemonSetNotReady";
    pub const LOG_GATEWAY_DEPLOYMENT_READY: &str = "LogGatewayDeploymentReady";
    pub const LOG_GATEWAY_DEPLOYMENT_NOT_READY: &str = "LogGatewayDeploymentNotReady";

    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const UNSUPPORTED_LOKI_OUTPUT: &str = "UnsupportedLokiOutput";
    pub const ENDPOINT_INVALID: &str = "EndpointInvalid";
    pub const MAX_PIPELINES_EXCEEDED: &str = "MaxPipelinesExceeded";
    pub const REFERENCED_SECRET_MISSING: &str = "ReferencedSecretMissing";
    pub const RECONCILE_TIMEOUT: &str = "ReconcileTimeout";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    pub const OTTL_SPEC_INVALID: &str = "OTTLSpecInvalid";
    pub const CONFIGURATION_INVALID: &str = "ConfigurationInvalid";

    pub const TLS_CONFIGURATION_INVALID: &str = "TLSConfigurationInvalid";
    pub const TLS_CERTIFICATE_INVALID: &str = "TLSCertificateInvalid";
    pub const TLS_CERTIFICATE_EXPIRED: &str = "TLSCertificateExpired";
    pub const TLS_CERTIFICATE_ABOUT_TO_EXPIRE: &str = "TLSCertificateAboutToExpire";
    pub const TLS_CERTIFICATE_KEY_PAIR_INVALID: &str = "TLSCertificateKeyPairInvalid";

    pub const SELF_MON_CONFIG_NOT_GENERATED: &str = "SelfMonConfigNotGenerated";
    pub const SELF_MON_FLOW_HEALTHY: &str = "SelfMonFlowHealthy";
    pub const SELF_MON_GATEWAY_ALL_DATA_DROPPED: &str = "SelfMonGatewayAllDataDropped";
    pub const SELF_MON_GATEWAY_SOME_DATA_DROPPED: &str = "SelfMonGatewaySomeDataDropped";
    pub const SELF_MON_GATEWAY_THROTTLING: &str = "SelfMonGatewayThrottling";
    pub const SELF_MON_AGENT_ALL_DATA_DROPPED: &str = "SelfMonAgentAllDataDropped";
    pub const SELF_MON_AGENT_SOME_DATA_DROPPED: &str = "SelfMonAgentSomeDataDropped";
    pub const SELF_MON_BUFFER_FILLING_UP: &str = "SelfMonBufferFillingUp";
    pub const SELF_MON_NO_LOGS_DELIVERED: &str = "SelfMonNoLogsDelivered";

    pub const NO_PIPELINE_DEPLOYED: &str = "NoPipelineDeployed";
    pub const RESOURCE_BLOCKS_DELETION: &str = "ResourceBlocksDeletion";
    pub const COMPONENTS_RUNNING: &str = "ComponentsRunning";
}

/// Message shown when a referenced secret or key is absent
pub const MSG_REFERENCED_SECRET_MISSING: &str = "One or more referenced Secrets are missing";
/// Message shown when the pipeline cap is reached
pub const MSG_MAX_PIPELINES_EXCEEDED: &str = "Maximum pipeline count limit exceeded";
/// Message shown for the removed Loki output
pub const MSG_UNSUPPORTED_LOKI_OUTPUT: &str = "grafana-loki output is not supported anymore. For integration with a custom Loki installation, use the `custom` output and follow https://kyma-project.io/#/telemetry-manager/user/integration/loki/README";
/// Message shown while pods of a workload are being replaced
pub const MSG_ROLLOUT_IN_PROGRESS: &str = "Pods are being started/updated";
/// Message shown when an API request during validation failed
pub const MSG_VALIDATION_FAILED: &str =
    "Pipeline validation failed due to an error from the Kubernetes API server";

fn docs_page(signal: Signal) -> &'static str {
    match signal {
        Signal::Logs => "02-logs",
        Signal::Traces => "03-traces",
        Signal::Metrics => "04-metrics",
    }
}

fn troubleshooting(signal: Signal, anchor: &str) -> String {
    format!(
        "See troubleshooting: https://kyma-project.io/#/telemetry-manager/user/{}?id={}",
        docs_page(signal),
        anchor
    )
}

/// Message for a reason code, specialised per signal; empty when there is none
pub fn message_for(reason: &str, signal: Signal) -> String {
    use reasons::*;

    let noun = signal.data_noun();
    let title = signal.title();
    match reason {
        GATEWAY_CONFIGURED => format!(
            "{} specification is successfully applied to the configuration of {} gateway",
            signal.kind(),
            title
        ),
        AGENT_CONFIGURED => format!(
            "{} specification is successfully applied to the configuration of Fluent Bit agent",
            signal.kind()
        ),
        GATEWAY_READY | TRACE_GATEWAY_DEPLOYMENT_READY | METRIC_GATEWAY_DEPLOYMENT_READY
        | LOG_GATEWAY_DEPLOYMENT_READY => format!("{} gateway Deployment is ready", title),
        GATEWAY_NOT_READY
        | TRACE_GATEWAY_DEPLOYMENT_NOT_READY
        | METRIC_GATEWAY_DEPLOYMENT_NOT_READY
        | LOG_GATEWAY_DEPLOYMENT_NOT_READY => format!("{} gateway Deployment is not ready", title),
        AGENT_READY => format!("{} agent DaemonSet is ready", title),
        AGENT_NOT_READY | METRIC_AGENT_DAEMONSET_NOT_READY => {
            format!("{} agent DaemonSet is not ready", title)
        }
        FLUENT_BIT_DS_READY => "Fluent Bit agent DaemonSet is ready".to_string(),
        FLUENT_BIT_DS_NOT_READY => "Fluent Bit agent DaemonSet is not ready".to_string(),
        ROLLOUT_IN_PROGRESS => MSG_ROLLOUT_IN_PROGRESS.to_string(),
        REFERENCED_SECRET_MISSING => MSG_REFERENCED_SECRET_MISSING.to_string(),
        MAX_PIPELINES_EXCEEDED => MSG_MAX_PIPELINES_EXCEEDED.to_string(),
        UNSUPPORTED_LOKI_OUTPUT => MSG_UNSUPPORTED_LOKI_OUTPUT.to_string(),
        VALIDATION_FAILED => MSG_VALIDATION_FAILED.to_string(),
        SELF_MON_FLOW_HEALTHY => "No problems detected in the telemetry flow".to_string(),
        SELF_MON_CONFIG_NOT_GENERATED => format!(
            "No {} delivered to backend because {} specification is not applied to the configuration of {} gateway. Check the 'ConfigurationGenerated' condition for more details",
            noun,
            signal.kind(),
            title
        ),
        SELF_MON_GATEWAY_ALL_DATA_DROPPED | SELF_MON_AGENT_ALL_DATA_DROPPED => format!(
            "Backend is not reachable or rejecting {noun}. All {noun} are dropped. {}",
            troubleshooting(signal, &format!("no-{}-arrive-at-the-backend", noun))
        ),
        SELF_MON_GATEWAY_SOME_DATA_DROPPED | SELF_MON_AGENT_SOME_DATA_DROPPED => {
            let anchor = match signal {
                Signal::Metrics => "metrics-not-arriving-at-the-destination".to_string(),
                _ => format!("not-all-{}-arrive-at-the-backend", noun),
            };
            format!(
                "Backend is reachable, but rejecting {noun}. Some {noun} are dropped. {}",
                troubleshooting(signal, &anchor)
            )
        }
        SELF_MON_GATEWAY_THROTTLING => format!(
            "{} gateway is unable to receive {} at current rate. {}",
            title,
            noun,
            troubleshooting(signal, "gateway-throttling")
        ),
        SELF_MON_BUFFER_FILLING_UP => {
            let anchor = match signal {
                Signal::Logs => "agent-buffer-filling-up",
                _ => "gateway-buffer-filling-up",
            };
            let unit = match signal {
                Signal::Traces => "span",
                Signal::Metrics => "metric",
                Signal::Logs => "log",
            };
            format!(
                "Buffer nearing capacity. Incoming {} rate exceeds export rate. {}",
                unit,
                troubleshooting(signal, anchor)
            )
        }
        SELF_MON_NO_LOGS_DELIVERED => format!(
            "Backend is not reachable or rejecting logs. Logs are buffered and not yet dropped. {}",
            troubleshooting(Signal::Logs, "no-logs-arrive-at-the-backend")
        ),
        NO_PIPELINE_DEPLOYED => "No pipelines have been deployed".to_string(),
        COMPONENTS_RUNNING => format!("All {} components are running", signal.singular()),
        _ => String::new(),
    }
}

/// Message of an `EndpointInvalid` condition
pub fn endpoint_invalid_message(detail: &str) -> String {
    format!("Endpoint is invalid: {}", detail)
}

/// Message of a `ConfigurationInvalid` condition
pub fn configuration_invalid_message(detail: &str) -> String {
    format!("Pipeline configuration could not be rendered: {}", detail)
}

/// Message of a `ReconcileFailed` condition
pub fn reconcile_failed_message(detail: &str) -> String {
    format!("Reconciliation failed: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_messages_name_the_signal() {
        assert_eq!(
            message_for(reasons::TRACE_GATEWAY_DEPLOYMENT_NOT_READY, Signal::Traces),
            "Trace gateway Deployment is not ready"
        );
        assert_eq!(
            message_for(reasons::METRIC_AGENT_DAEMONSET_NOT_READY, Signal::Metrics),
            "Metric agent DaemonSet is not ready"
        );
    }

    #[test]
    fn reasons_without_message_are_empty() {
        assert_eq!(
            message_for(reasons::METRIC_AGENT_NOT_REQUIRED, Signal::Metrics),
            ""
        );
    }

    #[test]
    fn flow_messages_link_troubleshooting() {
        assert_eq!(
            message_for(reasons::SELF_MON_GATEWAY_THROTTLING, Signal::Traces),
            "Trace gateway is unable to receive spans at current rate. See troubleshooting: https://kyma-project.io/#/telemetry-manager/user/03-traces?id=gateway-throttling"
        );
        assert_eq!(
            message_for(reasons::SELF_MON_GATEWAY_SOME_DATA_DROPPED, Signal::Metrics),
            "Backend is reachable, but rejecting metrics. Some metrics are dropped. See troubleshooting: https://kyma-project.io/#/telemetry-manager/user/04-metrics?id=metrics-not-arriving-at-the-destination"
        );
        assert_eq!(
            message_for(reasons::SELF_MON_BUFFER_FILLING_UP, Signal::Logs),
            "Buffer nearing capacity. Incoming log rate exceeds export rate. See troubleshooting: https://kyma-project.io/#/telemetry-manager/user/02-logs?id=agent-buffer-filling-up"
        );
    }

    #[test]
    fn components_running_uses_singular() {
        assert_eq!(
            message_for(reasons::COMPONENTS_RUNNING, Signal::Logs),
            "All log components are running"
        );
    }
}
