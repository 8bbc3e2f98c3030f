//! Aggregate status of the Telemetry module

use chrono::{DateTime, Utc};

use super::pipeline::merge_conditions;
use crate::conditions::{
    message_for, reasons, TYPE_AGENT_HEALTHY, TYPE_CONFIGURATION_GENERATED, TYPE_FLOW_HEALTHY,
    TYPE_GATEWAY_HEALTHY,
};
use crate::crd::{
    find_condition, Condition, ConditionStatus, GatewayEndpoints, ModuleState, OtlpEndpoints,
    TelemetryStatus,
};
use crate::signal::{Signal, OTLP_GRPC_PORT, OTLP_HTTP_PORT};

/// Reasons reported on the module without a signal prefix
const PLAIN_REASONS: [&str; 7] = [
    reasons::MAX_PIPELINES_EXCEEDED,
    reasons::UNSUPPORTED_LOKI_OUTPUT,
    reasons::TLS_CONFIGURATION_INVALID,
    reasons::TLS_CERTIFICATE_INVALID,
    reasons::TLS_CERTIFICATE_EXPIRED,
    reasons::TLS_CERTIFICATE_KEY_PAIR_INVALID,
    reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
];

/// A pipeline as seen by the module
#[derive(Clone, Debug)]
pub struct PipelineSummary {
    pub name: String,
    pub conditions: Vec<Condition>,
}

/// Everything the module knows about one signal
#[derive(Clone, Debug)]
pub struct SignalObservation {
    pub signal: Signal,
    pub pipelines: Vec<PipelineSummary>,
    /// LogParsers; only meaningful for logs
    pub parsers: Vec<String>,
    /// The signal's OTLP push Service exists
    pub otlp_service_exists: bool,
}

impl SignalObservation {
    /// Whether anything of this signal blocks module deletion
    pub fn has_dependents(&self) -> bool {
        !self.pipelines.is_empty() || !self.parsers.is_empty()
    }
}

/// Inputs of [`module_status`]
#[derive(Clone, Debug)]
pub struct ModuleObservation {
    pub namespace: String,
    pub deleting: bool,
    pub signals: Vec<SignalObservation>,
}

impl ModuleObservation {
    /// Whether any pipeline or parser still exists
    pub fn has_dependents(&self) -> bool {
        self.signals.iter().any(SignalObservation::has_dependents)
    }
}

fn priority(signal: Signal) -> &'static [&'static str] {
    match signal {
        Signal::Logs => &[TYPE_CONFIGURATION_GENERATED, TYPE_AGENT_HEALTHY, TYPE_GATEWAY_HEALTHY, TYPE_FLOW_HEALTHY],
        Signal::Metrics => &[TYPE_AGENT_HEALTHY, TYPE_GATEWAY_HEALTHY, TYPE_CONFIGURATION_GENERATED, TYPE_FLOW_HEALTHY],
        Signal::Traces => &[TYPE_GATEWAY_HEALTHY, TYPE_CONFIGURATION_GENERATED, TYPE_FLOW_HEALTHY],
    }
}

/// Module-level reason for a failing pipeline condition
pub fn module_reason(signal: Signal, condition: &Condition) -> String {
    if PLAIN_REASONS.contains(&condition.reason.as_str()) {
        return condition.reason.clone();
    }
    match condition.type_.as_str() {
        TYPE_GATEWAY_HEALTHY => format!("{}GatewayDeploymentNotReady", signal.title()),
        TYPE_AGENT_HEALTHY => format!("{}AgentDaemonSetNotReady", signal.title()),
        _ => format!("{}{}", signal.kind(), condition.reason),
    }
}

/// Message listing the resources that block deletion
pub fn deletion_blocked_message(observation: &SignalObservation) -> String {
    let mut groups = Vec::new();
    if !observation.pipelines.is_empty() {
        let mut names: Vec<&str> = observation.pipelines.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        groups.push(format!("{} ({})", observation.signal.kind_plural(), names.join(",")));
    }
    if !observation.parsers.is_empty() {
        let mut names: Vec<&str> = observation.parsers.iter().map(String::as_str).collect();
        names.sort_unstable();
        groups.push(format!("LogParsers ({})", names.join(",")));
    }
    format!(
        "The deletion of the module is blocked. To unblock the deletion, delete the following resources: {}",
        groups.join(", ")
    )
}

/// `<Signal>ComponentsHealthy` of one signal
pub fn components_healthy(observation: &SignalObservation, deleting: bool) -> Condition {
    let signal = observation.signal;
    let type_ = signal.components_healthy_type();

    if deleting && observation.has_dependents() {
        return Condition::new(
            type_,
            ConditionStatus::False,
            reasons::RESOURCE_BLOCKS_DELETION,
            deletion_blocked_message(observation),
        );
    }
    if observation.pipelines.is_empty() {
        return Condition::new(
            type_,
            ConditionStatus::True,
            reasons::NO_PIPELINE_DEPLOYED,
            message_for(reasons::NO_PIPELINE_DEPLOYED, signal),
        );
    }

    for condition_type in priority(signal) {
        let failing = observation
            .pipelines
            .iter()
            .filter_map(|p| find_condition(&p.conditions, condition_type))
            .find(|c| c.status == ConditionStatus::False);
        if let Some(failing) = failing {
            return Condition::new(
                type_,
                ConditionStatus::False,
                module_reason(signal, failing),
                failing.message.clone(),
            );
        }
    }

    let expiring = observation
        .pipelines
        .iter()
        .flat_map(|p| p.conditions.iter())
        .find(|c| c.reason == reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE);
    if let Some(expiring) = expiring {
        return Condition::new(
            type_,
            ConditionStatus::True,
            reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
            expiring.message.clone(),
        );
    }

    Condition::new(
        type_,
        ConditionStatus::True,
        reasons::COMPONENTS_RUNNING,
        message_for(reasons::COMPONENTS_RUNNING, signal),
    )
}

/// OTLP push endpoints of a signal's gateway
pub fn otlp_endpoints(signal: Signal, namespace: &str) -> OtlpEndpoints {
    let host = format!("{}.{}", signal.otlp_service_name(), namespace);
    OtlpEndpoints {
        grpc: format!("http://{}:{}", host, OTLP_GRPC_PORT),
        http: format!("http://{}:{}", host, OTLP_HTTP_PORT),
    }
}

/// Module state derived from its conditions
pub fn module_state(conditions: &[Condition], deleting: bool, has_dependents: bool) -> ModuleState {
    if deleting && !has_dependents {
        return ModuleState::Deleting;
    }
    let warning = conditions.iter().any(|c| {
        c.status == ConditionStatus::False || c.reason == reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE
    });
    if warning {
        ModuleState::Warning
    } else {
        ModuleState::Ready
    }
}

/// Full module status, keeping transition times of unchanged conditions
pub fn module_status(
    observation: &ModuleObservation,
    previous: Option<&TelemetryStatus>,
    now: DateTime<Utc>,
) -> TelemetryStatus {
    let mut ordered: Vec<&SignalObservation> = observation.signals.iter().collect();
    ordered.sort_by_key(|s| s.signal.title());

    let desired: Vec<Condition> = ordered
        .iter()
        .map(|s| components_healthy(s, observation.deleting))
        .collect();
    let conditions = merge_conditions(
        previous.map(|p| p.conditions.as_slice()).unwrap_or_default(),
        desired,
        now,
    );

    let mut endpoints = GatewayEndpoints::default();
    for s in observation.signals.iter().filter(|s| s.otlp_service_exists) {
        let e = Some(otlp_endpoints(s.signal, &observation.namespace));
        match s.signal {
            Signal::Logs => endpoints.logs = e,
            Signal::Metrics => endpoints.metrics = e,
            Signal::Traces => endpoints.traces = e,
        }
    }

    TelemetryStatus {
        state: module_state(&conditions, observation.deleting, observation.has_dependents()),
        conditions,
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::pipeline::{pipeline_conditions, AgentState, Backend, ConfigChecks, PipelineObservation};
    use crate::status::workload::WorkloadHealth;
    use crate::tls::TlsVerdict;
    use chrono::TimeZone;

    fn healthy(backend: Backend) -> Vec<Condition> {
        pipeline_conditions(&PipelineObservation {
            backend,
            generation: Some(1),
            legacy_layout: false,
            checks: ConfigChecks::default(),
            gateway: WorkloadHealth::Ready,
            agent: match backend {
                Backend::Collector(Signal::Traces) => None,
                _ => Some(AgentState::Probed(WorkloadHealth::Ready)),
            },
            alert: None,
        })
    }

    fn signal(signal: Signal, pipelines: Vec<(&str, Vec<Condition>)>) -> SignalObservation {
        SignalObservation {
            signal,
            pipelines: pipelines
                .into_iter()
                .map(|(name, conditions)| PipelineSummary {
                    name: name.to_string(),
                    conditions,
                })
                .collect(),
            parsers: Vec::new(),
            otlp_service_exists: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    // =========================================================================
    // Story Tests: Per-signal aggregate
    // =========================================================================

    #[test]
    fn story_no_pipelines_is_healthy() {
        let c = components_healthy(&signal(Signal::Traces, vec![]), false);
        assert_eq!(c.type_, "TraceComponentsHealthy");
        assert!(c.is_true());
        assert_eq!(c.reason, reasons::NO_PIPELINE_DEPLOYED);
        assert_eq!(c.message, "No pipelines have been deployed");
    }

    #[test]
    fn story_healthy_pipelines_report_components_running() {
        let obs = signal(
            Signal::Metrics,
            vec![("a", healthy(Backend::Collector(Signal::Metrics)))],
        );
        let c = components_healthy(&obs, false);
        assert_eq!(c.reason, reasons::COMPONENTS_RUNNING);
        assert_eq!(c.message, "All metric components are running");
    }

    #[test]
    fn story_unhealthy_gateway_gets_signal_prefix() {
        let mut conditions = healthy(Backend::Collector(Signal::Traces));
        let gateway = conditions
            .iter_mut()
            .find(|c| c.type_ == TYPE_GATEWAY_HEALTHY)
            .unwrap();
        gateway.status = ConditionStatus::False;
        gateway.reason = reasons::GATEWAY_NOT_READY.into();
        gateway.message = "Trace gateway Deployment is not ready".into();

        let c = components_healthy(&signal(Signal::Traces, vec![("a", conditions)]), false);
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "TraceGatewayDeploymentNotReady");
    }

    #[test]
    fn story_missing_secret_is_prefixed_with_kind() {
        let conditions = pipeline_conditions(&PipelineObservation {
            backend: Backend::Collector(Signal::Metrics),
            generation: None,
            legacy_layout: false,
            checks: ConfigChecks {
                secrets: crate::status::pipeline::SecretCheck::Missing,
                ..Default::default()
            },
            gateway: WorkloadHealth::Ready,
            agent: Some(AgentState::NotRequired),
            alert: None,
        });
        let c = components_healthy(&signal(Signal::Metrics, vec![("a", conditions)]), false);
        assert_eq!(c.reason, "MetricPipelineReferencedSecretMissing");
    }

    #[test]
    fn story_cap_reason_is_kept_plain() {
        let mut checks = ConfigChecks::default();
        checks.max_pipelines_exceeded = true;
        let conditions = pipeline_conditions(&PipelineObservation {
            backend: Backend::Collector(Signal::Traces),
            generation: None,
            legacy_layout: false,
            checks,
            gateway: WorkloadHealth::Ready,
            agent: None,
            alert: None,
        });
        let c = components_healthy(&signal(Signal::Traces, vec![("d", conditions)]), false);
        assert_eq!(c.reason, reasons::MAX_PIPELINES_EXCEEDED);
    }

    #[test]
    fn story_expiring_certificate_warns_module() {
        let conditions = pipeline_conditions(&PipelineObservation {
            backend: Backend::Collector(Signal::Traces),
            generation: None,
            legacy_layout: false,
            checks: ConfigChecks {
                tls: TlsVerdict::AboutToExpire {
                    message: "TLS certificate is about to expire, configured certificate is valid until 2024-06-08".into(),
                },
                ..Default::default()
            },
            gateway: WorkloadHealth::Ready,
            agent: None,
            alert: None,
        });
        let observation = ModuleObservation {
            namespace: "kyma-system".into(),
            deleting: false,
            signals: vec![signal(Signal::Traces, vec![("a", conditions)])],
        };
        let status = module_status(&observation, None, now());
        assert_eq!(status.state, ModuleState::Warning);
        assert!(status.conditions[0].is_true());
        assert_eq!(status.conditions[0].reason, reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE);
    }

    // =========================================================================
    // Story Tests: Module
    // =========================================================================

    #[test]
    fn story_conditions_and_endpoints_follow_signals() {
        let mut traces = signal(
            Signal::Traces,
            vec![("t", healthy(Backend::Collector(Signal::Traces)))],
        );
        traces.otlp_service_exists = true;
        let observation = ModuleObservation {
            namespace: "kyma-system".into(),
            deleting: false,
            signals: vec![traces, signal(Signal::Metrics, vec![]), signal(Signal::Logs, vec![])],
        };
        let status = module_status(&observation, None, now());

        let types: Vec<&str> = status.conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(
            types,
            vec!["LogComponentsHealthy", "MetricComponentsHealthy", "TraceComponentsHealthy"]
        );
        assert_eq!(status.state, ModuleState::Ready);
        let traces = status.endpoints.traces.unwrap();
        assert_eq!(traces.grpc, "http://telemetry-otlp-traces.kyma-system:4317");
        assert_eq!(traces.http, "http://telemetry-otlp-traces.kyma-system:4318");
        assert!(status.endpoints.metrics.is_none());
    }

    #[test]
    fn story_dependents_block_deletion() {
        let mut logs = signal(
            Signal::Logs,
            vec![("b", vec![]), ("a", vec![])],
        );
        logs.parsers = vec!["c".into()];
        let observation = ModuleObservation {
            namespace: "kyma-system".into(),
            deleting: true,
            signals: vec![logs, signal(Signal::Traces, vec![])],
        };
        let status = module_status(&observation, None, now());

        let log = find_condition(&status.conditions, "LogComponentsHealthy").unwrap();
        assert_eq!(log.reason, reasons::RESOURCE_BLOCKS_DELETION);
        assert_eq!(
            log.message,
            "The deletion of the module is blocked. To unblock the deletion, delete the following resources: LogPipelines (a,b), LogParsers (c)"
        );
        assert_eq!(status.state, ModuleState::Warning);
    }

    #[test]
    fn story_deleting_without_dependents() {
        let observation = ModuleObservation {
            namespace: "kyma-system".into(),
            deleting: true,
            signals: vec![signal(Signal::Logs, vec![])],
        };
        assert_eq!(module_status(&observation, None, now()).state, ModuleState::Deleting);
    }

    #[test]
    fn story_module_keeps_transition_times() {
        let observation = ModuleObservation {
            namespace: "kyma-system".into(),
            deleting: false,
            signals: vec![signal(Signal::Logs, vec![])],
        };
        let first = module_status(&observation, None, now());
        let later = now() + chrono::Duration::hours(1);
        let second = module_status(&observation, Some(&first), later);
        assert_eq!(second.conditions[0].last_transition_time, now());
    }
}
