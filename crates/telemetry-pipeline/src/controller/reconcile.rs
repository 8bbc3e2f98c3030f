//! Pipeline reconciliation shared by the trace, metric and log controllers
//!
//! One pass runs under the reconcile deadline and goes through:
//!
//! 1. list the pipelines of the signal and admit the oldest up to the cap
//! 2. resolve secrets, check endpoints and classify TLS for every admitted pipeline
//! 3. render the signal's components from the pipelines that passed, under
//!    the signal's render gate, and apply or remove them
//! 4. probe the workloads serving the reconciled pipeline
//! 5. compute its conditions and write them if they changed

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use tracing::{debug, error, instrument, warn};

use telemetry_common::events::{actions, reasons as event_reasons};

use super::context::PipelineContext;
use super::pipeline::{AggregateStatus, ComponentPlan, PipelineResource, RenderInputs, TelemetryPipeline};
use crate::conditions::{reasons, TYPE_CONFIGURATION_GENERATED};
use crate::config::ReconcilerConfig;
use crate::crd::{find_condition, Condition};
use crate::lock::admitted_names;
use crate::resources::{Component, ComponentInputs, ComponentKind, ComponentSet};
use crate::secrets::{self, ResolvedSecrets};
use crate::status::{
    daemon_set_health, deployment_health, failure_conditions, merge_conditions,
    pipeline_conditions, pod_selector, timeout_conditions, AgentState, Backend, ConfigChecks, PipelineObservation, SecretCheck,
    WorkloadHealth,
};
use crate::Error;

/// What one pass saw and decided for a whole signal
#[derive(Debug)]
pub struct SignalSnapshot<K> {
    /// Every pipeline of the signal
    pub pipelines: Vec<K>,
    /// Names admitted under the cap
    pub admitted: BTreeSet<String>,
    /// Configuration checks of every live pipeline
    pub checks: BTreeMap<String, ConfigChecks>,
    /// Secrets of the pipelines that passed every check
    pub secrets: ResolvedSecrets,
    /// Desired state of each component
    pub plans: Vec<ComponentPlan>,
    /// Components this pass deleted
    pub removed: Vec<String>,
}

impl<K: PipelineResource> SignalSnapshot<K> {
    /// Pipelines merged into the rendered configuration
    pub fn contributors(&self) -> Vec<&K> {
        self.pipelines
            .iter()
            .filter(|p| {
                self.checks
                    .get(&p.name_any())
                    .is_some_and(ConfigChecks::admits)
            })
            .collect()
    }

    fn plan(&self, component: &Component) -> Option<&ComponentPlan> {
        self.plans.iter().find(|p| p.component == *component)
    }
}

fn image_for<'a>(component: &Component, config: &'a ReconcilerConfig) -> &'a str {
    match component.kind {
        ComponentKind::FluentBit => &config.fluent_bit_image,
        ComponentKind::Gateway | ComponentKind::Agent => &config.collector_image,
    }
}

/// Resolve secrets and run the reconcile-time checks of one admitted pipeline
async fn evaluate<K: TelemetryPipeline>(
    pipeline: &K,
    ctx: &PipelineContext,
    now: DateTime<Utc>,
) -> (ConfigChecks, ResolvedSecrets) {
    let name = pipeline.name_any();
    let mut checks = ConfigChecks {
        unsupported_loki: pipeline.unsupported_loki(),
        ..Default::default()
    };

    let refs = pipeline.secret_refs();
    ctx.secret_watch.track(K::SIGNAL, &name, &refs);
    let resolved = match secrets::resolve(ctx.secrets.as_ref(), &refs).await {
        Ok(resolved) => resolved,
        Err(Error::SecretRef {
            secret,
            namespace,
            key,
            message,
        }) => {
            debug!(pipeline = %name, %secret, %namespace, %key, %message, "referenced secret missing");
            checks.secrets = SecretCheck::Missing;
            return (checks, ResolvedSecrets::new());
        }
        Err(e) => {
            warn!(pipeline = %name, error = %e, "failed to read referenced secrets");
            checks.secrets = SecretCheck::ApiError;
            return (checks, ResolvedSecrets::new());
        }
    };

    checks.endpoint_error = pipeline.endpoint_error(&resolved);
    checks.ottl_error = pipeline.ottl_error();
    if let Some(material) = pipeline.tls_material(&resolved) {
        checks.tls = ctx.tls.evaluate(&material, now);
    }
    (checks, resolved)
}

/// List the signal's pipelines, admit them under the cap and check each one
async fn snapshot<K: TelemetryPipeline>(
    ctx: &PipelineContext,
    now: DateTime<Utc>,
) -> Result<SignalSnapshot<K>, Error> {
    let signal = K::SIGNAL;
    let pipelines = K::list(ctx.kube.as_ref()).await?;
    let admitted = admitted_names(&pipelines, signal.max_pipelines());

    let listed: BTreeSet<String> = pipelines.iter().map(|p| p.name_any()).collect();
    ctx.secret_watch.retain_listed(signal, &listed);

    let mut checks = BTreeMap::new();
    let mut secrets = ResolvedSecrets::new();
    for pipeline in &pipelines {
        let name = pipeline.name_any();
        if pipeline.meta().deletion_timestamp.is_some() {
            ctx.secret_watch.forget(signal, &name);
            continue;
        }
        if !admitted.contains(&name) {
            ctx.secret_watch.forget(signal, &name);
            checks.insert(
                name,
                ConfigChecks {
                    max_pipelines_exceeded: true,
                    ..Default::default()
                },
            );
            continue;
        }

        let (pipeline_checks, resolved) = evaluate(pipeline, ctx, now).await;
        if pipeline_checks.admits() {
            secrets.extend(resolved);
        }
        checks.insert(name, pipeline_checks);
    }

    Ok(SignalSnapshot {
        pipelines,
        admitted,
        checks,
        secrets,
        plans: Vec::new(),
        removed: Vec::new(),
    })
}

/// Render the signal, dropping the contributors that cannot render
///
/// A permanent render failure of one pipeline must not hold back the
/// others. When the joint render fails, each contributor is rendered alone;
/// the ones that fail get a `render_error` and the rest render again.
fn render_isolating_failures<K: TelemetryPipeline>(
    snapshot: &mut SignalSnapshot<K>,
    inputs: &RenderInputs<'_>,
) -> Result<Vec<ComponentPlan>, Error> {
    let joint = K::render(&snapshot.contributors(), &snapshot.secrets, inputs);
    let error = match joint {
        Err(error @ Error::Render { .. }) => error,
        other => return other,
    };

    let failing: Vec<(String, String)> = snapshot
        .contributors()
        .into_iter()
        .filter_map(|pipeline| match K::render(&[pipeline], &snapshot.secrets, inputs) {
            Err(Error::Render { message, .. }) => Some((pipeline.name_any(), message)),
            _ => None,
        })
        .collect();
    if failing.is_empty() {
        return Err(error);
    }

    for (name, message) in failing {
        warn!(pipeline = %name, %message, "pipeline excluded from rendered configuration");
        if let Some(checks) = snapshot.checks.get_mut(&name) {
            checks.render_error = Some(message);
        }
    }
    K::render(&snapshot.contributors(), &snapshot.secrets, inputs)
}

/// Snapshot the signal and plan its components; with `apply`, also bring the
/// cluster in line with the plans
async fn observe<K: TelemetryPipeline>(
    ctx: &PipelineContext,
    apply: bool,
) -> Result<SignalSnapshot<K>, Error> {
    let namespace = ctx.config.target_namespace.as_str();
    let mut snapshot = snapshot::<K>(ctx, Utc::now()).await?;
    let module = ctx.kube.list_telemetries(namespace).await?.into_iter().next();
    let parsers = K::parsers(ctx.kube.as_ref()).await?;

    let inputs = RenderInputs {
        namespace,
        module: module.as_ref().map(|m| &m.spec),
        parsers: &parsers,
    };
    let plans = render_isolating_failures(&mut snapshot, &inputs)?;

    if apply {
        for plan in &plans {
            match &plan.rendered {
                Some(rendered) => {
                    let set = ComponentSet::build(&ComponentInputs {
                        component: plan.component.clone(),
                        namespace,
                        image: image_for(&plan.component, &ctx.config),
                        rendered,
                        owners: plan.owners.clone(),
                        replicas: plan.replicas,
                    });
                    ctx.kube.apply_component_set(&set).await?;
                }
                None => {
                    if ctx.kube.delete_component(&plan.component, namespace).await? > 0 {
                        snapshot.removed.push(plan.component.name.clone());
                    }
                }
            }
        }
    }

    snapshot.plans = plans;
    Ok(snapshot)
}

/// Health of the workloads serving a pipeline of `backend`
async fn probe<K: PipelineResource>(
    ctx: &PipelineContext,
    backend: Backend,
    snapshot: &SignalSnapshot<K>,
    now: DateTime<Utc>,
) -> Result<(WorkloadHealth, Option<AgentState>), Error> {
    let namespace = ctx.config.target_namespace.as_str();
    match backend {
        Backend::Collector(signal) => {
            let gateway = signal.gateway_name();
            let deployment = ctx.kube.get_deployment(namespace, &gateway).await?;
            let pods = match deployment {
                Some(_) => ctx.kube.list_pods(namespace, &pod_selector(&gateway)).await?,
                None => Vec::new(),
            };
            let gateway_health = deployment_health(deployment.as_ref(), &pods, now);

            let agent = match Component::agent(signal) {
                None => None,
                Some(component) if !snapshot.plan(&component).is_some_and(ComponentPlan::is_required) => {
                    Some(AgentState::NotRequired)
                }
                Some(component) => Some(AgentState::Probed(
                    daemon_set_probe(ctx, namespace, &component.name, now).await?,
                )),
            };
            Ok((gateway_health, agent))
        }
        Backend::FluentBit => {
            let component = Component::fluent_bit();
            let health = daemon_set_probe(ctx, namespace, &component.name, now).await?;
            Ok((WorkloadHealth::NotFound, Some(AgentState::Probed(health))))
        }
    }
}

async fn daemon_set_probe(
    ctx: &PipelineContext,
    namespace: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<WorkloadHealth, Error> {
    let daemon_set = ctx.kube.get_daemon_set(namespace, name).await?;
    let pods = match daemon_set {
        Some(_) => ctx.kube.list_pods(namespace, &pod_selector(name)).await?,
        None => Vec::new(),
    };
    Ok(daemon_set_health(daemon_set.as_ref(), &pods, now))
}

/// Publish an Event when `ConfigurationGenerated` changes reason or status
async fn publish_configuration_event<K: PipelineResource>(
    pipeline: &K,
    conditions: &[Condition],
    ctx: &PipelineContext,
) {
    let Some(current) = find_condition(conditions, TYPE_CONFIGURATION_GENERATED) else {
        return;
    };
    let unchanged = find_condition(pipeline.conditions(), TYPE_CONFIGURATION_GENERATED)
        .is_some_and(|previous| {
            previous.status == current.status && previous.reason == current.reason
        });
    if unchanged {
        return;
    }

    let (type_, reason) = if current.reason == reasons::MAX_PIPELINES_EXCEEDED {
        (EventType::Warning, event_reasons::MAX_PIPELINES_EXCEEDED)
    } else if current.is_true() {
        (EventType::Normal, event_reasons::CONFIGURATION_GENERATED)
    } else {
        (EventType::Warning, event_reasons::CONFIGURATION_REJECTED)
    };
    ctx.events
        .publish(
            &pipeline.object_ref(&()),
            type_,
            reason,
            actions::VALIDATE,
            Some(current.message.clone()),
        )
        .await;
}

async fn reconcile_pass<K: TelemetryPipeline>(
    pipeline: &K,
    ctx: &PipelineContext,
) -> Result<Action, Error> {
    let name = pipeline.name_any();
    let signal = K::SIGNAL;

    let gate = ctx.gates.get(signal);
    let snapshot = match gate.run(|| observe::<K>(ctx, true)).await? {
        Some(snapshot) => snapshot,
        None => {
            debug!("components already rendered by a concurrent reconcile");
            observe::<K>(ctx, false).await?
        }
    };

    if pipeline.meta().deletion_timestamp.is_some() {
        debug!("pipeline is being deleted, skipping status");
        return Ok(Action::await_change());
    }

    for component in &snapshot.removed {
        ctx.events
            .publish(
                &pipeline.object_ref(&()),
                EventType::Normal,
                event_reasons::COMPONENTS_REMOVED,
                actions::CLEANUP,
                Some(format!("Removed {} since no pipeline needs it", component)),
            )
            .await;
    }

    let Some(checks) = snapshot.checks.get(&name).cloned() else {
        debug!("pipeline no longer listed");
        return Ok(Action::await_change());
    };

    let now = Utc::now();
    let backend = pipeline.backend();
    let (gateway, agent) = probe(ctx, backend, &snapshot, now).await?;
    let observation = PipelineObservation {
        backend,
        generation: pipeline.meta().generation,
        legacy_layout: pipeline.legacy_layout(),
        checks,
        gateway,
        agent,
        alert: ctx.alerts.flow_alert(signal, &name, now),
    };
    let conditions = merge_conditions(pipeline.conditions(), pipeline_conditions(&observation), now);

    publish_configuration_event(pipeline, &conditions, ctx).await;
    if pipeline.status_unchanged(&conditions) {
        debug!("pipeline status unchanged, skipping update");
    } else {
        pipeline.write_status(ctx.kube.as_ref(), conditions).await?;
    }

    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Reconcile one pipeline of any signal
///
/// The pass runs under the configured deadline. On expiry the previous
/// conditions are kept, `ConfigurationGenerated` becomes Unknown with reason
/// `ReconcileTimeout` and the pipeline is retried. A pass that fails marks
/// `ConfigurationGenerated` False with reason `ReconcileFailed` before the
/// error goes to the error policy.
#[instrument(skip(pipeline, ctx), fields(pipeline = %pipeline.name_any(), signal = %K::SIGNAL))]
pub async fn reconcile<K: TelemetryPipeline>(
    pipeline: Arc<K>,
    ctx: Arc<PipelineContext>,
) -> Result<Action, Error> {
    debug!("reconciling pipeline");
    let deadline = ctx.config.reconcile_timeout;
    match tokio::time::timeout(deadline, reconcile_pass(pipeline.as_ref(), &ctx)).await {
        Ok(Ok(action)) => {
            ctx.backoff.reset(&backoff_key::<K>(&pipeline.name_any()));
            Ok(action)
        }
        Ok(Err(e)) => {
            if pipeline.meta().deletion_timestamp.is_none() {
                record_failure(pipeline.as_ref(), &ctx, &e).await;
            }
            Err(e)
        }
        Err(_) => {
            let seconds = deadline.as_secs();
            warn!(seconds, "reconcile deadline exceeded");
            let conditions = timeout_conditions(
                pipeline.conditions(),
                pipeline.meta().generation,
                seconds,
                Utc::now(),
            );
            if !pipeline.status_unchanged(&conditions) {
                pipeline.write_status(ctx.kube.as_ref(), conditions).await?;
            }
            ctx.events
                .publish(
                    &pipeline.object_ref(&()),
                    EventType::Warning,
                    event_reasons::RECONCILE_TIMEOUT,
                    actions::RECONCILE,
                    Some(format!("Reconciliation did not finish within {}s", seconds)),
                )
                .await;
            Err(Error::Timeout {
                pipeline: pipeline.name_any(),
                seconds,
            })
        }
    }
}

/// Reflect a failed pass in the pipeline's status so it stops claiming health
async fn record_failure<K: AggregateStatus>(pipeline: &K, ctx: &PipelineContext, error: &Error) {
    let conditions = failure_conditions(
        pipeline.conditions(),
        pipeline.meta().generation,
        K::SIGNAL,
        &error.to_string(),
        Utc::now(),
    );
    if pipeline.status_unchanged(&conditions) {
        return;
    }
    if let Err(write_error) = pipeline.write_status(ctx.kube.as_ref(), conditions).await {
        warn!(error = %write_error, "failed to record reconcile failure in status");
    }
}

fn backoff_key<K: PipelineResource>(name: &str) -> String {
    format!("{}/{}", K::SIGNAL, name)
}

/// Error policy of the pipeline controllers
///
/// Retryable errors requeue with exponential backoff per pipeline; permanent
/// ones wait for a spec change.
pub fn error_policy<K: PipelineResource>(
    pipeline: Arc<K>,
    error: &Error,
    ctx: Arc<PipelineContext>,
) -> Action {
    error!(
        ?error,
        pipeline = %pipeline.name_any(),
        signal = %K::SIGNAL,
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.backoff.next_delay(&backoff_key::<K>(&pipeline.name_any())))
    } else {
        Action::await_change()
    }
}
