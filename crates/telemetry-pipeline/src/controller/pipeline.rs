//! What differs between the three pipeline kinds
//!
//! The reconcile flow is shared; each kind plugs in through a small trait
//! set:
//!
//! - [`Validate`]: reconcile-time checks that need resolved secrets
//! - [`ResolveSecrets`]: the secret keys a pipeline reads
//! - [`Render`]: the components of the signal and their configuration
//! - [`OwnedObjects`]: listing the kind and the resources its render reads
//! - [`AggregateStatus`]: writing the condition list back
//!
//! [`TelemetryPipeline`] bundles them; every kind that implements the set
//! gets it for free.

use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use super::client::TelemetryKubeClient;
use crate::crd::{
    Condition, LogMode, LogParser, LogPipeline, LogPipelineStatus, MetricPipeline,
    MetricPipelineStatus, OtlpOutput, TelemetrySpec, TracePipeline, TracePipelineStatus, ValueType,
};
use crate::render::fluent_bit::fluent_bit_config;
use crate::render::otel::{
    log_agent, log_agent_required, log_gateway, metric_agent, metric_agent_required,
    metric_gateway, trace_gateway, RenderOptions,
};
use crate::render::RenderedConfig;
use crate::resources::{gateway_replicas, owner_references, Component};
use crate::secrets::{secret_refs, ResolvedSecrets};
use crate::signal::Signal;
use crate::status::Backend;
use crate::tls::TlsMaterial;
use crate::validation::{validate_endpoint, validate_filters, validate_transforms, EndpointError};
use crate::Error;
use telemetry_common::CONDITION_LAYOUT_ANNOTATION;

/// Annotation value selecting the legacy condition layout
pub const LEGACY_LAYOUT: &str = "legacy";

/// Identity shared by every pipeline kind
pub trait PipelineResource:
    Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static
{
    /// Signal the kind belongs to
    const SIGNAL: Signal;

    /// Workloads serving this pipeline
    fn backend(&self) -> Backend {
        Backend::Collector(Self::SIGNAL)
    }

    /// Conditions of the last written status
    fn conditions(&self) -> &[Condition];

    /// Pending/Running go last with deprecation notices
    fn legacy_layout(&self) -> bool {
        self.annotations()
            .get(CONDITION_LAYOUT_ANNOTATION)
            .is_some_and(|v| v == LEGACY_LAYOUT)
    }
}

/// Reconcile-time checks that need resolved secret values
pub trait Validate: PipelineResource {
    /// The pipeline uses the removed Loki output
    fn unsupported_loki(&self) -> bool {
        false
    }

    /// Endpoint problem, as the detail of an `EndpointInvalid` message
    fn endpoint_error(&self, secrets: &ResolvedSecrets) -> Option<String>;

    /// User-defined transform or filter the collector would refuse
    fn ottl_error(&self) -> Option<String> {
        None
    }

    /// TLS material to classify; `None` when TLS is off or unconfigured
    fn tls_material(&self, secrets: &ResolvedSecrets) -> Option<TlsMaterial>;
}

/// The secret keys a pipeline reads
pub trait ResolveSecrets: PipelineResource {
    /// Distinct, complete references in stable order
    fn secret_refs(&self) -> Vec<crate::crd::SecretKeyRef>;
}

/// Everything besides the pipelines a render needs
#[derive(Clone, Copy, Debug)]
pub struct RenderInputs<'a> {
    /// Namespace the components run in
    pub namespace: &'a str,
    /// Module settings, when a Telemetry resource exists
    pub module: Option<&'a TelemetrySpec>,
    /// LogParsers feeding the Fluent Bit parser file
    pub parsers: &'a [LogParser],
}

impl RenderInputs<'_> {
    fn options(&self) -> RenderOptions {
        RenderOptions::new(self.namespace)
            .with_enrichments(self.module.and_then(|m| m.enrichments()).cloned())
    }
}

/// Desired state of one component of the signal
#[derive(Clone, Debug)]
pub struct ComponentPlan {
    /// The component
    pub component: Component,
    /// Rendered configuration; `None` removes the component
    pub rendered: Option<RenderedConfig>,
    /// Owner references of the contributing pipelines
    pub owners: Vec<OwnerReference>,
    /// Gateway replica count
    pub replicas: i32,
}

impl ComponentPlan {
    fn apply<K>(component: Component, rendered: RenderedConfig, contributors: &[&K], replicas: i32) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            component,
            rendered: Some(rendered),
            owners: owner_references(contributors),
            replicas,
        }
    }

    fn remove(component: Component) -> Self {
        Self {
            component,
            rendered: None,
            owners: Vec::new(),
            replicas: 0,
        }
    }

    /// Whether the component should run
    pub fn is_required(&self) -> bool {
        self.rendered.is_some()
    }
}

/// Component plans of the signal for the pipelines that passed every check
pub trait Render: PipelineResource + Sized {
    /// One plan per component of the signal, in a stable order
    fn render(
        contributors: &[&Self],
        secrets: &ResolvedSecrets,
        inputs: &RenderInputs<'_>,
    ) -> Result<Vec<ComponentPlan>, Error>;
}

/// Cluster reads specific to the kind
#[async_trait]
pub trait OwnedObjects: PipelineResource + Sized {
    /// Every pipeline of the kind
    async fn list(kube: &dyn TelemetryKubeClient) -> Result<Vec<Self>, Error>;

    /// LogParsers when the kind renders them
    async fn parsers(_kube: &dyn TelemetryKubeClient) -> Result<Vec<LogParser>, Error> {
        Ok(Vec::new())
    }
}

/// Writing the condition list back
#[async_trait]
pub trait AggregateStatus: PipelineResource {
    /// The status to write carries nothing new
    fn status_unchanged(&self, conditions: &[Condition]) -> bool {
        self.conditions() == conditions
    }

    /// Patch the status subresource
    async fn write_status(
        &self,
        kube: &dyn TelemetryKubeClient,
        conditions: Vec<Condition>,
    ) -> Result<(), Error>;
}

/// A pipeline kind the shared reconcile flow can drive
pub trait TelemetryPipeline:
    Validate + ResolveSecrets + Render + OwnedObjects + AggregateStatus
{
}

impl<K> TelemetryPipeline for K where
    K: Validate + ResolveSecrets + Render + OwnedObjects + AggregateStatus
{
}

// =============================================================================
// Shared helpers
// =============================================================================

fn otlp_endpoint_error(output: &OtlpOutput, secrets: &ResolvedSecrets) -> Option<String> {
    let endpoint = match secrets.value(&output.endpoint) {
        Ok(endpoint) => endpoint,
        Err(_) => return Some(EndpointError::ResolveFailed.to_string()),
    };
    validate_endpoint(&endpoint, output.protocol)
        .err()
        .map(|e| e.to_string())
}

fn tls_material(
    cert: Option<&ValueType>,
    key: Option<&ValueType>,
    ca: Option<&ValueType>,
    secrets: &ResolvedSecrets,
) -> Option<TlsMaterial> {
    let resolve = |value: Option<&ValueType>| {
        value
            .filter(|v| v.is_defined())
            .and_then(|v| secrets.value(v).ok())
            .filter(|v| !v.trim().is_empty())
    };
    let material = TlsMaterial {
        cert: resolve(cert),
        key: resolve(key),
        ca: resolve(ca),
    };
    (!material.is_empty()).then_some(material)
}

fn otlp_tls_material(output: &OtlpOutput, secrets: &ResolvedSecrets) -> Option<TlsMaterial> {
    let tls = output.tls.as_ref().filter(|t| !t.insecure)?;
    tls_material(tls.cert.as_ref(), tls.key.as_ref(), tls.ca.as_ref(), secrets)
}

fn gateway_plan<K>(
    signal: Signal,
    contributors: &[&K],
    render: impl FnOnce() -> Result<RenderedConfig, Error>,
    inputs: &RenderInputs<'_>,
) -> Result<ComponentPlan, Error>
where
    K: Resource<DynamicType = ()>,
{
    let component = Component::gateway(signal);
    if contributors.is_empty() {
        return Ok(ComponentPlan::remove(component));
    }
    let scaling = inputs.module.and_then(|m| match signal {
        Signal::Traces => m.trace_scaling(),
        Signal::Metrics => m.metric_scaling(),
        Signal::Logs => m.log_scaling(),
    });
    let replicas = gateway_replicas(scaling, contributors.len());
    Ok(ComponentPlan::apply(component, render()?, contributors, replicas))
}

fn agent_plan<K>(
    signal: Signal,
    contributors: &[&K],
    required: bool,
    render: impl FnOnce() -> Result<RenderedConfig, Error>,
) -> Result<Option<ComponentPlan>, Error>
where
    K: Resource<DynamicType = ()>,
{
    let Some(component) = Component::agent(signal) else {
        return Ok(None);
    };
    if contributors.is_empty() || !required {
        return Ok(Some(ComponentPlan::remove(component)));
    }
    Ok(Some(ComponentPlan::apply(component, render()?, contributors, 1)))
}

// =============================================================================
// TracePipeline
// =============================================================================

impl PipelineResource for TracePipeline {
    const SIGNAL: Signal = Signal::Traces;

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }
}

impl Validate for TracePipeline {
    fn endpoint_error(&self, secrets: &ResolvedSecrets) -> Option<String> {
        otlp_endpoint_error(&self.spec.output.otlp, secrets)
    }

    fn ottl_error(&self) -> Option<String> {
        validate_transforms(Signal::Traces, &self.spec.transforms)
            .and_then(|()| validate_filters(Signal::Traces, &self.spec.filters))
            .err()
            .map(|e| e.to_string())
    }

    fn tls_material(&self, secrets: &ResolvedSecrets) -> Option<TlsMaterial> {
        otlp_tls_material(&self.spec.output.otlp, secrets)
    }
}

impl ResolveSecrets for TracePipeline {
    fn secret_refs(&self) -> Vec<crate::crd::SecretKeyRef> {
        secret_refs(self.spec.output.otlp.values())
    }
}

impl Render for TracePipeline {
    fn render(
        contributors: &[&Self],
        secrets: &ResolvedSecrets,
        inputs: &RenderInputs<'_>,
    ) -> Result<Vec<ComponentPlan>, Error> {
        let opts = inputs.options();
        let gateway = gateway_plan(
            Signal::Traces,
            contributors,
            || trace_gateway(contributors, secrets, &opts),
            inputs,
        )?;
        Ok(vec![gateway])
    }
}

#[async_trait]
impl OwnedObjects for TracePipeline {
    async fn list(kube: &dyn TelemetryKubeClient) -> Result<Vec<Self>, Error> {
        kube.list_trace_pipelines().await
    }
}

#[async_trait]
impl AggregateStatus for TracePipeline {
    async fn write_status(
        &self,
        kube: &dyn TelemetryKubeClient,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        let status = TracePipelineStatus { conditions };
        kube.patch_trace_pipeline_status(&self.name_any(), &status).await
    }
}

// =============================================================================
// MetricPipeline
// =============================================================================

impl PipelineResource for MetricPipeline {
    const SIGNAL: Signal = Signal::Metrics;

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }
}

impl Validate for MetricPipeline {
    fn endpoint_error(&self, secrets: &ResolvedSecrets) -> Option<String> {
        otlp_endpoint_error(&self.spec.output.otlp, secrets)
    }

    fn ottl_error(&self) -> Option<String> {
        validate_transforms(Signal::Metrics, &self.spec.transforms)
            .and_then(|()| validate_filters(Signal::Metrics, &self.spec.filters))
            .err()
            .map(|e| e.to_string())
    }

    fn tls_material(&self, secrets: &ResolvedSecrets) -> Option<TlsMaterial> {
        otlp_tls_material(&self.spec.output.otlp, secrets)
    }
}

impl ResolveSecrets for MetricPipeline {
    fn secret_refs(&self) -> Vec<crate::crd::SecretKeyRef> {
        secret_refs(self.spec.output.otlp.values())
    }
}

impl Render for MetricPipeline {
    fn render(
        contributors: &[&Self],
        secrets: &ResolvedSecrets,
        inputs: &RenderInputs<'_>,
    ) -> Result<Vec<ComponentPlan>, Error> {
        let opts = inputs.options();
        let mut plans = vec![gateway_plan(
            Signal::Metrics,
            contributors,
            || metric_gateway(contributors, secrets, &opts),
            inputs,
        )?];
        plans.extend(agent_plan(
            Signal::Metrics,
            contributors,
            metric_agent_required(contributors),
            || metric_agent(contributors, &opts),
        )?);
        Ok(plans)
    }
}

#[async_trait]
impl OwnedObjects for MetricPipeline {
    async fn list(kube: &dyn TelemetryKubeClient) -> Result<Vec<Self>, Error> {
        kube.list_metric_pipelines().await
    }
}

#[async_trait]
impl AggregateStatus for MetricPipeline {
    async fn write_status(
        &self,
        kube: &dyn TelemetryKubeClient,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        let status = MetricPipelineStatus { conditions };
        kube.patch_metric_pipeline_status(&self.name_any(), &status).await
    }
}

// =============================================================================
// LogPipeline
// =============================================================================

impl PipelineResource for LogPipeline {
    const SIGNAL: Signal = Signal::Logs;

    fn backend(&self) -> Backend {
        match self.spec.mode() {
            LogMode::Otel => Backend::Collector(Signal::Logs),
            LogMode::FluentBit => Backend::FluentBit,
        }
    }

    fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default()
    }
}

impl Validate for LogPipeline {
    fn unsupported_loki(&self) -> bool {
        self.spec.output.grafana_loki.is_some()
    }

    fn endpoint_error(&self, secrets: &ResolvedSecrets) -> Option<String> {
        self.spec
            .output
            .otlp
            .as_ref()
            .and_then(|otlp| otlp_endpoint_error(otlp, secrets))
    }

    fn ottl_error(&self) -> Option<String> {
        validate_transforms(Signal::Logs, &self.spec.transforms)
            .err()
            .map(|e| e.to_string())
    }

    fn tls_material(&self, secrets: &ResolvedSecrets) -> Option<TlsMaterial> {
        if let Some(otlp) = &self.spec.output.otlp {
            return otlp_tls_material(otlp, secrets);
        }
        let tls = &self.spec.output.http.as_ref()?.tls;
        if tls.disabled {
            return None;
        }
        tls_material(tls.cert.as_ref(), tls.key.as_ref(), tls.ca.as_ref(), secrets)
    }
}

impl ResolveSecrets for LogPipeline {
    fn secret_refs(&self) -> Vec<crate::crd::SecretKeyRef> {
        let output = &self.spec.output;
        let mut values: Vec<&ValueType> = Vec::new();
        if let Some(otlp) = &output.otlp {
            values.extend(otlp.values());
        }
        if let Some(http) = &output.http {
            values.extend([&http.host, &http.user, &http.password]);
            values.extend([&http.tls.ca, &http.tls.cert, &http.tls.key].into_iter().flatten());
        }
        let mut refs: BTreeSet<crate::crd::SecretKeyRef> = secret_refs(values).into_iter().collect();
        refs.extend(
            self.spec
                .variables
                .iter()
                .filter_map(|v| v.value_from.secret_key_ref.as_ref())
                .filter(|r| r.is_complete())
                .cloned(),
        );
        refs.into_iter().collect()
    }
}

impl Render for LogPipeline {
    fn render(
        contributors: &[&Self],
        secrets: &ResolvedSecrets,
        inputs: &RenderInputs<'_>,
    ) -> Result<Vec<ComponentPlan>, Error> {
        let (otel, fluent_bit): (Vec<&LogPipeline>, Vec<&LogPipeline>) = contributors
            .iter()
            .copied()
            .partition(|p| p.spec.mode() == LogMode::Otel);
        let opts = inputs.options();

        let mut plans = vec![gateway_plan(
            Signal::Logs,
            &otel,
            || log_gateway(&otel, secrets, &opts),
            inputs,
        )?];
        plans.extend(agent_plan(
            Signal::Logs,
            &otel,
            log_agent_required(&otel),
            || log_agent(&otel, &opts),
        )?);

        let component = Component::fluent_bit();
        if fluent_bit.is_empty() {
            plans.push(ComponentPlan::remove(component));
        } else {
            let parsers: Vec<&LogParser> = inputs
                .parsers
                .iter()
                .filter(|p| p.meta().deletion_timestamp.is_none())
                .collect();
            let rendered = fluent_bit_config(&fluent_bit, &parsers, secrets, inputs.namespace)?;
            plans.push(ComponentPlan::apply(component, rendered, &fluent_bit, 1));
        }
        Ok(plans)
    }
}

#[async_trait]
impl OwnedObjects for LogPipeline {
    async fn list(kube: &dyn TelemetryKubeClient) -> Result<Vec<Self>, Error> {
        kube.list_log_pipelines().await
    }

    async fn parsers(kube: &dyn TelemetryKubeClient) -> Result<Vec<LogParser>, Error> {
        kube.list_log_parsers().await
    }
}

#[async_trait]
impl AggregateStatus for LogPipeline {
    fn status_unchanged(&self, conditions: &[Condition]) -> bool {
        let unsupported = Some(self.spec.is_unsupported_mode());
        self.conditions() == conditions
            && self.status.as_ref().and_then(|s| s.unsupported_mode) == unsupported
    }

    async fn write_status(
        &self,
        kube: &dyn TelemetryKubeClient,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        let status = LogPipelineStatus {
            conditions,
            unsupported_mode: Some(self.spec.is_unsupported_mode()),
        };
        kube.patch_log_pipeline_status(&self.name_any(), &status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        HttpOutput, LogOutput, LogPipelineSpec, LokiOutput, MetricInput, MetricOutput, MetricPipelineSpec,
        OtlpProtocol, OtlpTls, SecretKeyRef, TraceOutput, TracePipelineSpec, VariableRef,
        ValueFromSource,
    };
    use std::collections::BTreeMap;

    fn trace(name: &str, endpoint: ValueType) -> TracePipeline {
        let mut output = OtlpOutput::new(OtlpProtocol::Grpc, "");
        output.endpoint = endpoint;
        let mut p = TracePipeline::new(
            name,
            TracePipelineSpec {
                output: TraceOutput { otlp: output },
                ..Default::default()
            },
        );
        p.metadata.uid = Some(format!("uid-{}", name));
        p
    }

    fn inputs() -> RenderInputs<'static> {
        RenderInputs {
            namespace: "kyma-system",
            module: None,
            parsers: &[],
        }
    }

    // =========================================================================
    // Story Tests: Reconcile-time validation
    // =========================================================================

    #[test]
    fn story_unresolved_endpoint_is_reported_as_resolve_failure() {
        let p = trace("p", ValueType::from_secret("creds", "default", "endpoint"));
        assert_eq!(
            p.endpoint_error(&ResolvedSecrets::new()).as_deref(),
            Some("failed to resolve value")
        );
    }

    #[test]
    fn story_resolved_secret_endpoint_is_validated() {
        let p = trace("p", ValueType::from_secret("creds", "default", "endpoint"));
        let mut secrets = ResolvedSecrets::new();
        let key = SecretKeyRef {
            name: "creds".to_string(),
            namespace: "default".to_string(),
            key: "endpoint".to_string(),
        };
        secrets.insert(key.clone(), "backend.example.com");
        assert_eq!(p.endpoint_error(&secrets).as_deref(), Some("missing port"));

        secrets.insert(key, "https://backend.example.com:4317");
        assert_eq!(p.endpoint_error(&secrets), None);
    }

    /// Story: a transform that passed admission under an older operator is still caught
    #[test]
    fn story_invalid_transform_is_caught_at_reconcile() {
        let mut p = trace("p", ValueType::inline("http://backend:4317"));
        assert_eq!(p.ottl_error(), None);

        p.spec.filters = vec![crate::crd::FilterSpec {
            conditions: vec![r#"span.nme == "GET""#.to_string()],
        }];
        assert_eq!(
            p.ottl_error().as_deref(),
            Some(r#"invalid FilterSpec: condition 'span.nme == "GET"': span has no field nme"#)
        );
    }

    #[test]
    fn story_insecure_tls_is_not_evaluated() {
        let mut p = trace("p", ValueType::inline("https://backend:4317"));
        p.spec.output.otlp.tls = Some(OtlpTls {
            insecure: true,
            cert: Some(ValueType::inline("cert")),
            ..Default::default()
        });
        assert_eq!(p.tls_material(&ResolvedSecrets::new()), None);

        p.spec.output.otlp.tls.as_mut().unwrap().insecure = false;
        let material = p.tls_material(&ResolvedSecrets::new()).unwrap();
        assert_eq!(material.cert.as_deref(), Some("cert"));
        assert_eq!(material.key, None);
    }

    #[test]
    fn story_loki_output_is_flagged() {
        let p = LogPipeline::new(
            "loki",
            LogPipelineSpec {
                output: LogOutput {
                    grafana_loki: Some(LokiOutput::default()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert!(p.unsupported_loki());
        assert_eq!(p.backend(), Backend::FluentBit);
    }

    #[test]
    fn story_legacy_layout_follows_annotation() {
        let mut p = trace("p", ValueType::inline("https://backend:4317"));
        assert!(!p.legacy_layout());
        p.metadata.annotations = Some(BTreeMap::from([(
            CONDITION_LAYOUT_ANNOTATION.to_string(),
            LEGACY_LAYOUT.to_string(),
        )]));
        assert!(p.legacy_layout());
    }

    // =========================================================================
    // Story Tests: Secret references
    // =========================================================================

    #[test]
    fn story_log_pipeline_collects_http_and_variable_refs() {
        let p = LogPipeline::new(
            "http",
            LogPipelineSpec {
                output: LogOutput {
                    http: Some(HttpOutput {
                        host: ValueType::from_secret("creds", "default", "host"),
                        user: ValueType::inline("user"),
                        password: ValueType::from_secret("creds", "default", "password"),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                variables: vec![VariableRef {
                    name: "TOKEN".to_string(),
                    value_from: ValueFromSource {
                        secret_key_ref: Some(SecretKeyRef {
                            name: "token".to_string(),
                            namespace: "default".to_string(),
                            key: "value".to_string(),
                        }),
                    },
                }],
                ..Default::default()
            },
        );
        let keys: Vec<String> = p.secret_refs().iter().map(|r| r.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "creds.default.host",
                "creds.default.password",
                "token.default.value"
            ]
        );
    }

    // =========================================================================
    // Story Tests: Component plans
    // =========================================================================

    #[test]
    fn story_no_contributors_removes_gateway() {
        let plans = TracePipeline::render(&[], &ResolvedSecrets::new(), &inputs()).unwrap();
        assert_eq!(plans.len(), 1);
        assert!(!plans[0].is_required());
        assert_eq!(plans[0].component.name, "telemetry-trace-gateway");
    }

    #[test]
    fn story_gateway_is_owned_by_every_contributor() {
        let a = trace("a", ValueType::inline("https://a:4317"));
        let b = trace("b", ValueType::inline("https://b:4317"));
        let plans = TracePipeline::render(&[&a, &b], &ResolvedSecrets::new(), &inputs()).unwrap();

        let gateway = &plans[0];
        assert!(gateway.is_required());
        let owners: Vec<&str> = gateway.owners.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(owners, vec!["a", "b"]);
        assert_eq!(gateway.replicas, 2);
    }

    #[test]
    fn story_metric_agent_removed_without_agent_inputs() {
        let mut p = MetricPipeline::new(
            "otlp-only",
            MetricPipelineSpec {
                input: MetricInput::default(),
                output: MetricOutput {
                    otlp: OtlpOutput::new(OtlpProtocol::Grpc, "https://backend:4317"),
                },
                ..Default::default()
            },
        );
        p.metadata.uid = Some("uid".to_string());

        let plans = MetricPipeline::render(&[&p], &ResolvedSecrets::new(), &inputs()).unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans[0].is_required());
        assert_eq!(plans[1].component.name, "telemetry-metric-agent");
        assert!(!plans[1].is_required());
    }
}
