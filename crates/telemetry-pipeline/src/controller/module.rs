//! Telemetry module reconciliation
//!
//! The module does not render anything itself. It summarizes the pipelines
//! of every signal into `<Signal>ComponentsHealthy` conditions, publishes the
//! gateway push endpoints and holds its finalizer while pipelines or parsers
//! remain.

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use telemetry_common::events::{actions, reasons as event_reasons};

use super::client::MODULE_FINALIZER;
use super::context::PipelineContext;
use super::pipeline::PipelineResource;
use crate::crd::Telemetry;
use crate::status::{module_status, ModuleObservation, PipelineSummary, SignalObservation};
use crate::validation::validate_telemetry_spec;
use crate::{Error, Signal};

fn summaries<K: PipelineResource>(pipelines: &[K]) -> Vec<PipelineSummary> {
    let mut out: Vec<PipelineSummary> = pipelines
        .iter()
        .map(|p| PipelineSummary {
            name: p.name_any(),
            conditions: p.conditions().to_vec(),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// Gather every signal's pipelines, parsers and push Service
async fn observe_module(
    ctx: &PipelineContext,
    namespace: &str,
    deleting: bool,
) -> Result<ModuleObservation, Error> {
    let kube = ctx.kube.as_ref();
    let logs = summaries(&kube.list_log_pipelines().await?);
    let metrics = summaries(&kube.list_metric_pipelines().await?);
    let traces = summaries(&kube.list_trace_pipelines().await?);
    let mut parsers: Vec<String> = kube
        .list_log_parsers()
        .await?
        .iter()
        .map(|p| p.name_any())
        .collect();
    parsers.sort();

    let mut signals = Vec::with_capacity(Signal::ALL.len());
    for (signal, pipelines, parsers) in [
        (Signal::Logs, logs, parsers),
        (Signal::Metrics, metrics, Vec::new()),
        (Signal::Traces, traces, Vec::new()),
    ] {
        let otlp_service_exists = kube
            .service_exists(namespace, &signal.otlp_service_name())
            .await?;
        signals.push(SignalObservation {
            signal,
            pipelines,
            parsers,
            otlp_service_exists,
        });
    }

    Ok(ModuleObservation {
        namespace: namespace.to_string(),
        deleting,
        signals,
    })
}

/// Reconcile the Telemetry module
#[instrument(skip(module, ctx), fields(module = %module.name_any()))]
pub async fn reconcile_module(
    module: Arc<Telemetry>,
    ctx: Arc<PipelineContext>,
) -> Result<Action, Error> {
    let name = module.name_any();
    let namespace = module
        .namespace()
        .unwrap_or_else(|| ctx.config.target_namespace.clone());
    let deleting = module.meta().deletion_timestamp.is_some();
    let has_finalizer = module.finalizers().iter().any(|f| f == MODULE_FINALIZER);

    if deleting && !has_finalizer {
        debug!("module is being deleted and no longer held");
        return Ok(Action::await_change());
    }
    if !deleting && !has_finalizer {
        info!("adding module finalizer");
        ctx.kube
            .set_telemetry_finalizer(&name, &namespace, true)
            .await?;
    }

    if let Err(e) = validate_telemetry_spec(&module.spec) {
        warn!(error = %e, "module spec rejected, falling back to defaults where invalid");
        ctx.events
            .publish(
                &module.object_ref(&()),
                EventType::Warning,
                event_reasons::CONFIGURATION_REJECTED,
                actions::VALIDATE,
                Some(e.to_string()),
            )
            .await;
    }

    let observation = observe_module(&ctx, &namespace, deleting).await?;
    let status = module_status(&observation, module.status.as_ref(), Utc::now());
    if module.status.as_ref() == Some(&status) {
        debug!("module status unchanged, skipping update");
    } else {
        info!(state = %status.state, "updating module status");
        ctx.kube
            .patch_telemetry_status(&name, &namespace, &status)
            .await?;
    }

    if !deleting {
        return Ok(Action::requeue(ctx.config.resync_interval));
    }

    if observation.has_dependents() {
        let blocking: Vec<String> = status
            .conditions
            .iter()
            .filter(|c| !c.is_true())
            .map(|c| c.message.clone())
            .collect();
        warn!("module deletion blocked by remaining pipelines");
        ctx.events
            .publish(
                &module.object_ref(&()),
                EventType::Warning,
                event_reasons::DELETION_BLOCKED,
                actions::CLEANUP,
                blocking.into_iter().next(),
            )
            .await;
        return Ok(Action::requeue(ctx.config.resync_interval));
    }

    info!("no pipeline left, releasing module");
    ctx.kube
        .set_telemetry_finalizer(&name, &namespace, false)
        .await?;
    Ok(Action::await_change())
}

/// Error policy of the module controller
pub fn error_policy_module(
    module: Arc<Telemetry>,
    error: &Error,
    ctx: Arc<PipelineContext>,
) -> Action {
    error!(
        ?error,
        module = %module.name_any(),
        retryable = error.is_retryable(),
        "module reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.backoff.next_delay(&format!("module/{}", module.name_any())))
    } else {
        Action::await_change()
    }
}
