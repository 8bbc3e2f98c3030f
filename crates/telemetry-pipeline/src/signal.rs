//! Telemetry signal kinds and the fixed names derived from them

use std::fmt;

/// Collector metrics port scraped by the self-monitor
pub const METRICS_PORT: i32 = 8888;
/// OTLP gRPC port
pub const OTLP_GRPC_PORT: i32 = 4317;
/// OTLP HTTP port
pub const OTLP_HTTP_PORT: i32 = 4318;
/// Collector health check extension port
pub const HEALTH_CHECK_PORT: i32 = 13133;
/// pprof extension port
pub const PPROF_PORT: i32 = 1777;
/// Fluent Bit HTTP server port
pub const FLUENT_BIT_HTTP_PORT: i32 = 2020;

/// Name of the Fluent Bit DaemonSet and its satellite objects
pub const FLUENT_BIT_NAME: &str = "telemetry-fluent-bit";

/// One of the three telemetry signals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signal {
    /// LogPipeline
    Logs,
    /// MetricPipeline
    Metrics,
    /// TracePipeline
    Traces,
}

impl Signal {
    /// Every signal
    pub const ALL: [Signal; 3] = [Signal::Logs, Signal::Metrics, Signal::Traces];

    /// Maximum number of admitted pipelines
    pub fn max_pipelines(&self) -> usize {
        match self {
            Self::Logs => 5,
            Self::Metrics => 3,
            Self::Traces => 3,
        }
    }

    /// Pipeline kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Logs => "LogPipeline",
            Self::Metrics => "MetricPipeline",
            Self::Traces => "TracePipeline",
        }
    }

    /// Lowercase singular (`log`, `metric`, `trace`)
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Logs => "log",
            Self::Metrics => "metric",
            Self::Traces => "trace",
        }
    }

    /// Capitalized singular (`Log`, `Metric`, `Trace`)
    pub fn title(&self) -> &'static str {
        match self {
            Self::Logs => "Log",
            Self::Metrics => "Metric",
            Self::Traces => "Trace",
        }
    }

    /// Data type in collector pipeline ids and user-facing text (`logs`, `metrics`, `traces`)
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Metrics => "metrics",
            Self::Traces => "traces",
        }
    }

    /// Noun for the unit of data (`logs`, `metrics`, `spans`)
    pub fn data_noun(&self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Metrics => "metrics",
            Self::Traces => "spans",
        }
    }

    /// Name of the gateway Deployment
    pub fn gateway_name(&self) -> String {
        format!("telemetry-{}-gateway", self.singular())
    }

    /// Name of the agent DaemonSet, for signals that have one
    pub fn agent_name(&self) -> Option<String> {
        match self {
            Self::Traces => None,
            _ => Some(format!("telemetry-{}-agent", self.singular())),
        }
    }

    /// Name of the OTLP push Service in front of the gateway
    pub fn otlp_service_name(&self) -> String {
        format!("telemetry-otlp-{}", self.data_type())
    }

    /// Kind plural used in deletion-blocked messages
    pub fn kind_plural(&self) -> String {
        format!("{}s", self.kind())
    }

    /// Module condition type aggregating this signal
    pub fn components_healthy_type(&self) -> String {
        format!("{}ComponentsHealthy", self.title())
    }

    /// Parse an alert name prefix (`Log`, `Metric`, `Trace`)
    pub fn from_alert_prefix(name: &str) -> Option<(Signal, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|s| name.strip_prefix(s.title()).map(|rest| (s, rest)))
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.data_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_signal() {
        assert_eq!(Signal::Traces.gateway_name(), "telemetry-trace-gateway");
        assert_eq!(
            Signal::Metrics.agent_name().as_deref(),
            Some("telemetry-metric-agent")
        );
        assert_eq!(Signal::Traces.agent_name(), None);
        assert_eq!(Signal::Logs.otlp_service_name(), "telemetry-otlp-logs");
        assert_eq!(Signal::Metrics.components_healthy_type(), "MetricComponentsHealthy");
    }

    #[test]
    fn caps_per_signal() {
        assert_eq!(Signal::Logs.max_pipelines(), 5);
        assert_eq!(Signal::Metrics.max_pipelines(), 3);
        assert_eq!(Signal::Traces.max_pipelines(), 3);
    }

    #[test]
    fn alert_prefix_splits_signal() {
        assert_eq!(
            Signal::from_alert_prefix("MetricGatewayThrottling"),
            Some((Signal::Metrics, "GatewayThrottling"))
        );
        assert_eq!(Signal::from_alert_prefix("Watchdog"), None);
    }
}
