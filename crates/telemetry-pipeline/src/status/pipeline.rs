//! Conditions of a single pipeline
//!
//! Every condition is a pure function of what the reconcile observed: the
//! configuration checks, the health of the shared workloads and the firing
//! self-monitor alerts. The previous status only contributes transition
//! times, see [`merge_conditions`].

use chrono::{DateTime, Utc};

use super::workload::WorkloadHealth;
use crate::conditions::{
    configuration_invalid_message, endpoint_invalid_message, message_for, reasons,
    reconcile_failed_message, PENDING_DEPRECATION_MSG,
    RUNNING_DEPRECATION_MSG, TYPE_AGENT_HEALTHY, TYPE_CONFIGURATION_GENERATED,
    TYPE_FLOW_HEALTHY, TYPE_GATEWAY_HEALTHY, TYPE_PENDING, TYPE_RUNNING,
};
use crate::crd::{Condition, ConditionStatus};
use crate::signal::Signal;
use crate::tls::TlsVerdict;

/// Workloads a pipeline is served by
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// OpenTelemetry gateway, with an agent for logs and metrics
    Collector(Signal),
    /// Fluent Bit DaemonSet (logs only)
    FluentBit,
}

impl Backend {
    /// Signal served
    pub fn signal(&self) -> Signal {
        match self {
            Self::Collector(signal) => *signal,
            Self::FluentBit => Signal::Logs,
        }
    }

    fn configured_reason(&self) -> &'static str {
        match self {
            Self::Collector(_) => reasons::GATEWAY_CONFIGURED,
            Self::FluentBit => reasons::AGENT_CONFIGURED,
        }
    }

    fn workload_reason(&self, ready: bool) -> &'static str {
        use reasons::*;
        match (self, ready) {
            (Self::Collector(Signal::Traces), true) => TRACE_GATEWAY_DEPLOYMENT_READY,
            (Self::Collector(Signal::Traces), false) => TRACE_GATEWAY_DEPLOYMENT_NOT_READY,
            (Self::Collector(Signal::Metrics), true) => METRIC_GATEWAY_DEPLOYMENT_READY,
            (Self::Collector(Signal::Metrics), false) => METRIC_GATEWAY_DEPLOYMENT_NOT_READY,
            (Self::Collector(Signal::Logs), true) => LOG_GATEWAY_DEPLOYMENT_READY,
            (Self::Collector(Signal::Logs), false) => LOG_GATEWAY_DEPLOYMENT_NOT_READY,
            (Self::FluentBit, true) => FLUENT_BIT_DS_READY,
            (Self::FluentBit, false) => FLUENT_BIT_DS_NOT_READY,
        }
    }
}

/// Outcome of resolving the pipeline's secret references
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SecretCheck {
    /// Every reference resolved
    #[default]
    Resolved,
    /// A secret or key is absent
    Missing,
    /// The API server failed while reading a secret
    ApiError,
}

/// Everything `ConfigurationGenerated` is derived from
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigChecks {
    /// The pipeline lost the cap admission
    pub max_pipelines_exceeded: bool,
    /// The pipeline uses the removed Loki output
    pub unsupported_loki: bool,
    /// Secret resolution outcome
    pub secrets: SecretCheck,
    /// Endpoint validation failure
    pub endpoint_error: Option<String>,
    /// First invalid transform or filter statement
    pub ottl_error: Option<String>,
    /// Verdict on the configured TLS material
    pub tls: TlsVerdict,
    /// The pipeline alone failed to render
    pub render_error: Option<String>,
}

impl Default for ConfigChecks {
    fn default() -> Self {
        Self {
            max_pipelines_exceeded: false,
            unsupported_loki: false,
            secrets: SecretCheck::Resolved,
            endpoint_error: None,
            ottl_error: None,
            tls: TlsVerdict::Valid,
            render_error: None,
        }
    }
}

impl ConfigChecks {
    /// Whether the pipeline may be merged into the rendered configuration
    pub fn admits(&self) -> bool {
        !self.max_pipelines_exceeded
            && !self.unsupported_loki
            && self.secrets == SecretCheck::Resolved
            && self.endpoint_error.is_none()
            && self.ottl_error.is_none()
            && !self.tls.is_fatal()
            && self.render_error.is_none()
    }
}

/// Agent state as seen by one pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentState {
    /// No admitted pipeline needs the agent
    NotRequired,
    /// The agent runs with this health
    Probed(WorkloadHealth),
}

/// Observations a pipeline's conditions are computed from
#[derive(Clone, Debug)]
pub struct PipelineObservation {
    pub backend: Backend,
    pub generation: Option<i64>,
    /// Pending/Running go last with deprecation notices
    pub legacy_layout: bool,
    pub checks: ConfigChecks,
    /// Gateway health; ignored for Fluent Bit
    pub gateway: WorkloadHealth,
    /// Agent state; `None` for signals without an agent
    pub agent: Option<AgentState>,
    /// Highest-priority firing alert reason
    pub alert: Option<&'static str>,
}

fn condition(type_: &str, status: ConditionStatus, reason: &str, message: String) -> Condition {
    Condition::new(type_, status, reason, message)
}

/// `ConfigurationGenerated`, evaluated in priority order
pub fn configuration_generated(backend: Backend, checks: &ConfigChecks) -> Condition {
    use reasons::*;
    let signal = backend.signal();
    let rejected = |reason: &str, message: String| {
        condition(TYPE_CONFIGURATION_GENERATED, ConditionStatus::False, reason, message)
    };

    if checks.max_pipelines_exceeded {
        return rejected(MAX_PIPELINES_EXCEEDED, message_for(MAX_PIPELINES_EXCEEDED, signal));
    }
    if checks.unsupported_loki {
        return rejected(UNSUPPORTED_LOKI_OUTPUT, message_for(UNSUPPORTED_LOKI_OUTPUT, signal));
    }
    match checks.secrets {
        SecretCheck::Missing => {
            return rejected(
                REFERENCED_SECRET_MISSING,
                message_for(REFERENCED_SECRET_MISSING, signal),
            )
        }
        SecretCheck::ApiError => {
            return rejected(VALIDATION_FAILED, message_for(VALIDATION_FAILED, signal))
        }
        SecretCheck::Resolved => {}
    }
    if let Some(detail) = &checks.endpoint_error {
        return rejected(ENDPOINT_INVALID, endpoint_invalid_message(detail));
    }
    if let Some(detail) = &checks.ottl_error {
        return rejected(OTTL_SPEC_INVALID, detail.clone());
    }
    if let Some(detail) = &checks.render_error {
        return rejected(CONFIGURATION_INVALID, configuration_invalid_message(detail));
    }
    match &checks.tls {
        TlsVerdict::Invalid { reason, message } => rejected(*reason, message.clone()),
        TlsVerdict::AboutToExpire { message } => condition(
            TYPE_CONFIGURATION_GENERATED,
            ConditionStatus::True,
            TLS_CERTIFICATE_ABOUT_TO_EXPIRE,
            message.clone(),
        ),
        TlsVerdict::Valid => {
            let reason = backend.configured_reason();
            condition(
                TYPE_CONFIGURATION_GENERATED,
                ConditionStatus::True,
                reason,
                message_for(reason, signal),
            )
        }
    }
}

fn health_condition(
    type_: &str,
    signal: Signal,
    health: &WorkloadHealth,
    ready_reason: &str,
    not_ready_reason: &str,
) -> Condition {
    match health {
        WorkloadHealth::Ready => condition(
            type_,
            ConditionStatus::True,
            ready_reason,
            message_for(ready_reason, signal),
        ),
        WorkloadHealth::RolloutInProgress => condition(
            type_,
            ConditionStatus::True,
            reasons::ROLLOUT_IN_PROGRESS,
            message_for(reasons::ROLLOUT_IN_PROGRESS, signal),
        ),
        WorkloadHealth::NotReady(problem) => condition(
            type_,
            ConditionStatus::False,
            not_ready_reason,
            problem.clone(),
        ),
        WorkloadHealth::NotFound => condition(
            type_,
            ConditionStatus::False,
            not_ready_reason,
            message_for(not_ready_reason, signal),
        ),
    }
}

/// `GatewayHealthy`
pub fn gateway_healthy(signal: Signal, health: &WorkloadHealth) -> Condition {
    health_condition(
        TYPE_GATEWAY_HEALTHY,
        signal,
        health,
        reasons::GATEWAY_READY,
        reasons::GATEWAY_NOT_READY,
    )
}

/// `AgentHealthy` of a collector agent or of Fluent Bit
pub fn agent_healthy(backend: Backend, state: &AgentState) -> Condition {
    let signal = backend.signal();
    match state {
        AgentState::NotRequired => {
            let reason = match signal {
                Signal::Logs => reasons::LOG_AGENT_NOT_REQUIRED,
                _ => reasons::METRIC_AGENT_NOT_REQUIRED,
            };
            condition(
                TYPE_AGENT_HEALTHY,
                ConditionStatus::True,
                reason,
                message_for(reason, signal),
            )
        }
        AgentState::Probed(health) => health_condition(
            TYPE_AGENT_HEALTHY,
            signal,
            health,
            reasons::AGENT_READY,
            reasons::AGENT_NOT_READY,
        ),
    }
}

/// `TelemetryFlowHealthy`
pub fn flow_healthy(signal: Signal, configuration: &Condition, alert: Option<&str>) -> Condition {
    if !configuration.is_true() {
        let reason = reasons::SELF_MON_CONFIG_NOT_GENERATED;
        return condition(
            TYPE_FLOW_HEALTHY,
            ConditionStatus::False,
            reason,
            message_for(reason, signal),
        );
    }
    match alert {
        Some(reason) => condition(
            TYPE_FLOW_HEALTHY,
            ConditionStatus::False,
            reason,
            message_for(reason, signal),
        ),
        None => condition(
            TYPE_FLOW_HEALTHY,
            ConditionStatus::True,
            reasons::SELF_MON_FLOW_HEALTHY,
            message_for(reasons::SELF_MON_FLOW_HEALTHY, signal),
        ),
    }
}

/// `Pending`/`Running`, exactly one of them True.
///
/// Running needs generated configuration and a workload that finished its
/// rollout. A rejected configuration is reported through Pending with the
/// configuration's own reason. In the legacy layout a running pipeline
/// keeps its history: Pending flips to False ahead of Running.
pub fn pending_or_running(
    backend: Backend,
    configuration: &Condition,
    workload: &WorkloadHealth,
    legacy_layout: bool,
) -> Vec<Condition> {
    let signal = backend.signal();
    let (pending_prefix, running_prefix) = if legacy_layout {
        (PENDING_DEPRECATION_MSG, RUNNING_DEPRECATION_MSG)
    } else {
        ("", "")
    };
    let not_ready = backend.workload_reason(false);

    if !configuration.is_true() {
        return vec![condition(
            TYPE_PENDING,
            ConditionStatus::True,
            &configuration.reason,
            format!("{}{}", pending_prefix, configuration.message),
        )];
    }
    if *workload != WorkloadHealth::Ready {
        return vec![condition(
            TYPE_PENDING,
            ConditionStatus::True,
            not_ready,
            format!("{}{}", pending_prefix, message_for(not_ready, signal)),
        )];
    }

    let ready = backend.workload_reason(true);
    let running = condition(
        TYPE_RUNNING,
        ConditionStatus::True,
        ready,
        format!("{}{}", running_prefix, message_for(ready, signal)),
    );
    if !legacy_layout {
        return vec![running];
    }
    let pending = condition(
        TYPE_PENDING,
        ConditionStatus::False,
        not_ready,
        format!("{}{}", pending_prefix, message_for(not_ready, signal)),
    );
    vec![pending, running]
}

/// Full condition list of a pipeline, in its layout's order
pub fn pipeline_conditions(observation: &PipelineObservation) -> Vec<Condition> {
    let backend = observation.backend;
    let signal = backend.signal();
    let configuration = configuration_generated(backend, &observation.checks);

    let mut health = Vec::new();
    let main_workload = match backend {
        Backend::Collector(_) => {
            health.push(gateway_healthy(signal, &observation.gateway));
            if let Some(agent) = &observation.agent {
                health.push(agent_healthy(backend, agent));
            }
            observation.gateway.clone()
        }
        Backend::FluentBit => {
            let fluent_bit = match &observation.agent {
                Some(AgentState::Probed(h)) => h.clone(),
                _ => WorkloadHealth::NotFound,
            };
            health.push(agent_healthy(backend, &AgentState::Probed(fluent_bit.clone())));
            fluent_bit
        }
    };

    let legacy = pending_or_running(
        backend,
        &configuration,
        &main_workload,
        observation.legacy_layout,
    );
    let flow = flow_healthy(signal, &configuration, observation.alert);

    let mut out = vec![configuration];
    out.extend(health);
    if observation.legacy_layout {
        out.push(flow);
        out.extend(legacy);
    } else {
        out.extend(legacy);
        out.push(flow);
    }
    out.into_iter()
        .map(|c| c.with_generation(observation.generation))
        .collect()
}

/// Carry transition times over from `previous` for unchanged conditions
pub fn merge_conditions(
    previous: &[Condition],
    desired: Vec<Condition>,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    desired
        .into_iter()
        .map(|mut c| {
            c.last_transition_time = previous
                .iter()
                .find(|p| p.same_state(&c))
                .map(|p| p.last_transition_time)
                .unwrap_or(now);
            c
        })
        .collect()
}

/// Previous conditions with `ConfigurationGenerated` marked timed out
pub fn timeout_conditions(
    previous: &[Condition],
    generation: Option<i64>,
    seconds: u64,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut timed_out = Condition::new(
        TYPE_CONFIGURATION_GENERATED,
        ConditionStatus::Unknown,
        reasons::RECONCILE_TIMEOUT,
        format!("Reconciliation did not finish within {}s", seconds),
    )
    .with_generation(generation);
    timed_out.last_transition_time = now;

    let mut out: Vec<Condition> = previous.to_vec();
    match out.iter_mut().find(|c| c.type_ == TYPE_CONFIGURATION_GENERATED) {
        Some(existing) if existing.same_state(&timed_out) => {}
        Some(existing) => *existing = timed_out,
        None => out.insert(0, timed_out),
    }
    out
}

/// Previous conditions with `ConfigurationGenerated` marked failed
///
/// A pass that errored out leaves no trustworthy observation, so the other
/// conditions stay as they were except the flow, which cannot be healthy
/// without generated configuration.
pub fn failure_conditions(
    previous: &[Condition],
    generation: Option<i64>,
    signal: Signal,
    detail: &str,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut failed = Condition::new(
        TYPE_CONFIGURATION_GENERATED,
        ConditionStatus::False,
        reasons::RECONCILE_FAILED,
        reconcile_failed_message(detail),
    )
    .with_generation(generation);
    failed.last_transition_time = now;

    let mut out: Vec<Condition> = previous.to_vec();
    match out.iter_mut().find(|c| c.type_ == TYPE_CONFIGURATION_GENERATED) {
        Some(existing) if existing.same_state(&failed) => {}
        Some(existing) => *existing = failed.clone(),
        None => out.insert(0, failed.clone()),
    }
    if let Some(flow) = out.iter_mut().find(|c| c.type_ == TYPE_FLOW_HEALTHY) {
        let mut not_generated = flow_healthy(signal, &failed, None).with_generation(generation);
        not_generated.last_transition_time = now;
        if !flow.same_state(&not_generated) {
            *flow = not_generated;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::find_condition;
    use chrono::TimeZone;

    fn observation(backend: Backend) -> PipelineObservation {
        PipelineObservation {
            backend,
            generation: Some(4),
            legacy_layout: false,
            checks: ConfigChecks::default(),
            gateway: WorkloadHealth::Ready,
            agent: match backend {
                Backend::Collector(Signal::Traces) => None,
                Backend::Collector(_) => Some(AgentState::NotRequired),
                Backend::FluentBit => Some(AgentState::Probed(WorkloadHealth::Ready)),
            },
            alert: None,
        }
    }

    fn types(conditions: &[Condition]) -> Vec<&str> {
        conditions.iter().map(|c| c.type_.as_str()).collect()
    }

    fn get<'a>(conditions: &'a [Condition], type_: &str) -> &'a Condition {
        find_condition(conditions, type_).unwrap()
    }

    // =========================================================================
    // Story Tests: Configuration
    // =========================================================================

    #[test]
    fn story_healthy_trace_pipeline_is_running() {
        let conditions = pipeline_conditions(&observation(Backend::Collector(Signal::Traces)));
        assert_eq!(
            types(&conditions),
            vec![
                TYPE_CONFIGURATION_GENERATED,
                TYPE_GATEWAY_HEALTHY,
                TYPE_RUNNING,
                TYPE_FLOW_HEALTHY
            ]
        );
        let configuration = get(&conditions, TYPE_CONFIGURATION_GENERATED);
        assert_eq!(configuration.reason, reasons::GATEWAY_CONFIGURED);
        assert_eq!(
            configuration.message,
            "TracePipeline specification is successfully applied to the configuration of Trace gateway"
        );
        assert_eq!(
            get(&conditions, TYPE_RUNNING).reason,
            reasons::TRACE_GATEWAY_DEPLOYMENT_READY
        );
        assert!(conditions.iter().all(|c| c.observed_generation == Some(4)));
    }

    #[test]
    fn story_cap_wins_over_every_other_finding() {
        let checks = ConfigChecks {
            max_pipelines_exceeded: true,
            secrets: SecretCheck::Missing,
            endpoint_error: Some("missing port".into()),
            ..Default::default()
        };
        let c = configuration_generated(Backend::Collector(Signal::Metrics), &checks);
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, reasons::MAX_PIPELINES_EXCEEDED);
        assert!(!checks.admits());
    }

    #[test]
    fn story_missing_secret_precedes_endpoint() {
        let checks = ConfigChecks {
            secrets: SecretCheck::Missing,
            endpoint_error: Some("missing port".into()),
            ..Default::default()
        };
        let c = configuration_generated(Backend::Collector(Signal::Traces), &checks);
        assert_eq!(c.reason, reasons::REFERENCED_SECRET_MISSING);
        assert_eq!(c.message, "One or more referenced Secrets are missing");
    }

    #[test]
    fn story_invalid_endpoint_names_the_problem() {
        let checks = ConfigChecks {
            endpoint_error: Some("missing port".into()),
            ..Default::default()
        };
        let c = configuration_generated(Backend::Collector(Signal::Logs), &checks);
        assert_eq!(c.reason, reasons::ENDPOINT_INVALID);
        assert_eq!(c.message, "Endpoint is invalid: missing port");
    }

    #[test]
    fn story_expiring_certificate_keeps_configuration() {
        let mut obs = observation(Backend::Collector(Signal::Traces));
        obs.checks.tls = TlsVerdict::AboutToExpire {
            message: "TLS certificate is about to expire, configured certificate is valid until 2024-06-08".into(),
        };
        assert!(obs.checks.admits());

        let conditions = pipeline_conditions(&obs);
        let configuration = get(&conditions, TYPE_CONFIGURATION_GENERATED);
        assert!(configuration.is_true());
        assert_eq!(configuration.reason, reasons::TLS_CERTIFICATE_ABOUT_TO_EXPIRE);
        assert!(get(&conditions, TYPE_RUNNING).is_true());
        assert!(get(&conditions, TYPE_FLOW_HEALTHY).is_true());
    }

    #[test]
    fn story_expired_certificate_rejects_configuration() {
        let checks = ConfigChecks {
            tls: TlsVerdict::Invalid {
                reason: reasons::TLS_CERTIFICATE_EXPIRED,
                message: "TLS certificate expired on 2024-01-01".into(),
            },
            ..Default::default()
        };
        let c = configuration_generated(Backend::Collector(Signal::Traces), &checks);
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, reasons::TLS_CERTIFICATE_EXPIRED);
        assert_eq!(c.message, "TLS certificate expired on 2024-01-01");
    }

    #[test]
    fn story_fluent_bit_is_configured_as_agent() {
        let c = configuration_generated(Backend::FluentBit, &ConfigChecks::default());
        assert_eq!(c.reason, reasons::AGENT_CONFIGURED);
        assert_eq!(
            c.message,
            "LogPipeline specification is successfully applied to the configuration of Fluent Bit agent"
        );
    }

    // =========================================================================
    // Story Tests: Workload health
    // =========================================================================

    #[test]
    fn story_rollout_keeps_gateway_healthy_but_pending() {
        let mut obs = observation(Backend::Collector(Signal::Metrics));
        obs.gateway = WorkloadHealth::RolloutInProgress;
        let conditions = pipeline_conditions(&obs);

        let gateway = get(&conditions, TYPE_GATEWAY_HEALTHY);
        assert!(gateway.is_true());
        assert_eq!(gateway.reason, reasons::ROLLOUT_IN_PROGRESS);
        assert_eq!(gateway.message, "Pods are being started/updated");
        let pending = get(&conditions, TYPE_PENDING);
        assert_eq!(pending.reason, reasons::METRIC_GATEWAY_DEPLOYMENT_NOT_READY);
        assert!(find_condition(&conditions, TYPE_RUNNING).is_none());
    }

    #[test]
    fn story_crashing_agent_reports_pod_problem() {
        let mut obs = observation(Backend::Collector(Signal::Metrics));
        obs.agent = Some(AgentState::Probed(WorkloadHealth::NotReady(
            "Container collector of pod a-1 was OOMKilled".into(),
        )));
        let conditions = pipeline_conditions(&obs);
        let agent = get(&conditions, TYPE_AGENT_HEALTHY);
        assert_eq!(agent.status, ConditionStatus::False);
        assert_eq!(agent.reason, reasons::AGENT_NOT_READY);
        assert_eq!(agent.message, "Container collector of pod a-1 was OOMKilled");
    }

    #[test]
    fn story_agent_not_required_is_positive() {
        let conditions = pipeline_conditions(&observation(Backend::Collector(Signal::Logs)));
        let agent = get(&conditions, TYPE_AGENT_HEALTHY);
        assert!(agent.is_true());
        assert_eq!(agent.reason, reasons::LOG_AGENT_NOT_REQUIRED);
    }

    #[test]
    fn story_missing_gateway_is_not_ready() {
        let c = gateway_healthy(Signal::Traces, &WorkloadHealth::NotFound);
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.message, "Trace gateway Deployment is not ready");
    }

    #[test]
    fn story_fluent_bit_has_no_gateway_condition() {
        let conditions = pipeline_conditions(&observation(Backend::FluentBit));
        assert!(find_condition(&conditions, TYPE_GATEWAY_HEALTHY).is_none());
        assert_eq!(get(&conditions, TYPE_RUNNING).reason, reasons::FLUENT_BIT_DS_READY);
    }

    // =========================================================================
    // Story Tests: Flow and legacy layout
    // =========================================================================

    #[test]
    fn story_rejected_pipeline_has_no_flow() {
        let mut obs = observation(Backend::Collector(Signal::Metrics));
        obs.checks.max_pipelines_exceeded = true;
        obs.alert = Some(reasons::SELF_MON_GATEWAY_THROTTLING);
        let conditions = pipeline_conditions(&obs);

        assert_eq!(
            get(&conditions, TYPE_FLOW_HEALTHY).reason,
            reasons::SELF_MON_CONFIG_NOT_GENERATED
        );
        let pending = get(&conditions, TYPE_PENDING);
        assert_eq!(pending.reason, reasons::MAX_PIPELINES_EXCEEDED);
        assert_eq!(pending.message, "Maximum pipeline count limit exceeded");
    }

    #[test]
    fn story_firing_alert_flags_flow() {
        let mut obs = observation(Backend::Collector(Signal::Traces));
        obs.alert = Some(reasons::SELF_MON_GATEWAY_ALL_DATA_DROPPED);
        let flow = get(&pipeline_conditions(&obs), TYPE_FLOW_HEALTHY).clone();
        assert_eq!(flow.status, ConditionStatus::False);
        assert_eq!(flow.reason, reasons::SELF_MON_GATEWAY_ALL_DATA_DROPPED);
    }

    #[test]
    fn story_legacy_layout_appends_prefixed_pending_running() {
        let mut obs = observation(Backend::FluentBit);
        obs.legacy_layout = true;
        obs.agent = Some(AgentState::Probed(WorkloadHealth::RolloutInProgress));
        let conditions = pipeline_conditions(&obs);

        assert_eq!(
            types(&conditions),
            vec![
                TYPE_CONFIGURATION_GENERATED,
                TYPE_AGENT_HEALTHY,
                TYPE_FLOW_HEALTHY,
                TYPE_PENDING
            ]
        );
        let pending = conditions.last().unwrap();
        assert_eq!(pending.reason, reasons::FLUENT_BIT_DS_NOT_READY);
        assert_eq!(
            pending.message,
            "[NOTE: The \"Pending\" type is deprecated] Fluent Bit agent DaemonSet is not ready"
        );
    }

    #[test]
    fn story_legacy_running_keeps_pending_false_before_running() {
        let mut obs = observation(Backend::Collector(Signal::Metrics));
        obs.legacy_layout = true;
        let conditions = pipeline_conditions(&obs);

        let tail = &conditions[conditions.len() - 2..];
        assert_eq!(types(tail), vec![TYPE_PENDING, TYPE_RUNNING]);

        let pending = &tail[0];
        assert_eq!(pending.status, ConditionStatus::False);
        assert_eq!(pending.reason, reasons::METRIC_GATEWAY_DEPLOYMENT_NOT_READY);
        assert_eq!(
            pending.message,
            "[NOTE: The \"Pending\" type is deprecated] Metric gateway Deployment is not ready"
        );

        let running = &tail[1];
        assert!(running.is_true());
        assert_eq!(running.reason, reasons::METRIC_GATEWAY_DEPLOYMENT_READY);
        assert_eq!(
            running.message,
            "[NOTE: The \"Running\" type is deprecated] Metric gateway Deployment is ready"
        );
    }

    #[test]
    fn story_current_layout_reports_running_alone() {
        let conditions = pipeline_conditions(&observation(Backend::Collector(Signal::Metrics)));
        assert!(find_condition(&conditions, TYPE_PENDING).is_none());
        assert!(get(&conditions, TYPE_RUNNING).is_true());
    }

    #[test]
    fn story_exactly_one_of_pending_running_holds() {
        for gateway in [
            WorkloadHealth::Ready,
            WorkloadHealth::RolloutInProgress,
            WorkloadHealth::NotFound,
        ] {
            let mut obs = observation(Backend::Collector(Signal::Traces));
            obs.gateway = gateway;
            let conditions = pipeline_conditions(&obs);
            let marks = conditions
                .iter()
                .filter(|c| (c.type_ == TYPE_PENDING || c.type_ == TYPE_RUNNING) && c.is_true())
                .count();
            assert_eq!(marks, 1);
        }
    }

    // =========================================================================
    // Story Tests: Transition times
    // =========================================================================

    #[test]
    fn story_unchanged_condition_keeps_transition_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut previous = pipeline_conditions(&observation(Backend::Collector(Signal::Traces)));
        for c in &mut previous {
            c.last_transition_time = earlier;
        }

        let mut obs = observation(Backend::Collector(Signal::Traces));
        obs.alert = Some(reasons::SELF_MON_GATEWAY_THROTTLING);
        let merged = merge_conditions(&previous, pipeline_conditions(&obs), now);

        assert_eq!(get(&merged, TYPE_CONFIGURATION_GENERATED).last_transition_time, earlier);
        assert_eq!(get(&merged, TYPE_FLOW_HEALTHY).last_transition_time, now);
    }

    #[test]
    fn story_timeout_marks_configuration_unknown() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let previous = pipeline_conditions(&observation(Backend::Collector(Signal::Traces)));
        let out = timeout_conditions(&previous, Some(5), 60, now);

        assert_eq!(out.len(), previous.len());
        let configuration = get(&out, TYPE_CONFIGURATION_GENERATED);
        assert_eq!(configuration.status, ConditionStatus::Unknown);
        assert_eq!(configuration.reason, reasons::RECONCILE_TIMEOUT);
        assert_eq!(get(&out, TYPE_RUNNING), get(&previous, TYPE_RUNNING));

        let fresh = timeout_conditions(&[], None, 60, now);
        assert_eq!(types(&fresh), vec![TYPE_CONFIGURATION_GENERATED]);
    }

    #[test]
    fn story_failed_pass_rejects_configuration_and_flow() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let previous = pipeline_conditions(&observation(Backend::Collector(Signal::Traces)));
        let out = failure_conditions(&previous, Some(5), Signal::Traces, "apply conflict", now);

        assert_eq!(types(&out), types(&previous));
        let configuration = get(&out, TYPE_CONFIGURATION_GENERATED);
        assert_eq!(configuration.status, ConditionStatus::False);
        assert_eq!(configuration.reason, reasons::RECONCILE_FAILED);
        assert_eq!(configuration.message, "Reconciliation failed: apply conflict");
        assert_eq!(
            get(&out, TYPE_FLOW_HEALTHY).reason,
            reasons::SELF_MON_CONFIG_NOT_GENERATED
        );
        assert_eq!(get(&out, TYPE_GATEWAY_HEALTHY), get(&previous, TYPE_GATEWAY_HEALTHY));
    }

    #[test]
    fn story_pipeline_failing_to_render_is_rejected() {
        let checks = ConfigChecks {
            render_error: Some("custom filter must name a Fluent Bit plugin".to_string()),
            ..Default::default()
        };
        assert!(!checks.admits());
        let configuration = configuration_generated(Backend::FluentBit, &checks);
        assert_eq!(configuration.status, ConditionStatus::False);
        assert_eq!(configuration.reason, reasons::CONFIGURATION_INVALID);
        assert!(configuration.message.contains("custom filter must name a Fluent Bit plugin"));
    }

    #[test]
    fn story_invalid_transform_follows_endpoint() {
        let mut checks = ConfigChecks {
            ottl_error: Some("invalid TransformSpec: unknown function sset".to_string()),
            ..Default::default()
        };
        let configuration = configuration_generated(Backend::Collector(Signal::Traces), &checks);
        assert_eq!(configuration.reason, reasons::OTTL_SPEC_INVALID);
        assert_eq!(configuration.message, "invalid TransformSpec: unknown function sset");

        checks.endpoint_error = Some("missing port".to_string());
        let configuration = configuration_generated(Backend::Collector(Signal::Traces), &checks);
        assert_eq!(configuration.reason, reasons::ENDPOINT_INVALID);
    }
}
