//! Controller runner - builds controller futures for every pipeline kind and the module
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! drives. All controllers share one [`PipelineContext`] so render gates,
//! the secret watch set and the alert store are common to every signal.
//! A pipeline held back by the cap is promoted through the sibling watch:
//! deleting any pipeline of its kind re-reconciles all of them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::BroadcastStream;

use telemetry_common::crd::{LogParser, LogPipeline, MetricPipeline, Telemetry, TracePipeline};
use telemetry_pipeline::controller::{
    error_policy, error_policy_module, reconcile, reconcile_module, PipelineContext,
    PipelineResource, TelemetryPipeline,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Pipelines of one kind reconciled in parallel; a single pipeline never runs twice at once
const MAX_CONCURRENT_RECONCILES: u16 = 4;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// References to every object in `store`
fn all_objects<K>(store: &Store<K>) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store
        .state()
        .iter()
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}

/// Pipelines of kind `K` listed as owners of a workload
///
/// Shared workloads carry one owner reference per contributing pipeline.
/// The pipelines are cluster-scoped, so the refs carry no namespace.
fn owning_pipelines<K: PipelineResource>(meta: &ObjectMeta) -> Vec<ObjectRef<K>> {
    let kind = K::kind(&());
    meta.owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.kind == kind && owner.api_version == K::api_version(&()))
        .map(|owner| ObjectRef::new(&owner.name))
        .collect()
}

/// Controller for one pipeline kind
///
/// Besides its own objects, a pipeline reacts to every other pipeline of
/// the same kind (they share workloads and the cap), to the Telemetry
/// module, to the Secrets it reads, to the workloads it owns and to
/// self-monitor alerts for its signal.
fn pipeline_controller<K>(client: &Client, ctx: Arc<PipelineContext>, name: &'static str) -> ControllerFuture
where
    K: TelemetryPipeline + DeserializeOwned,
{
    let namespace = ctx.config.target_namespace.clone();
    let controller = Controller::new(Api::<K>::all(client.clone()), watcher_config())
        .with_config(ControllerConfig::default().concurrency(MAX_CONCURRENT_RECONCILES));

    let siblings = controller.store();
    let for_module = controller.store();
    let secret_watch = ctx.clone();

    let alerts = BroadcastStream::new(ctx.alerts.subscribe()).filter_map(|wakeup| {
        std::future::ready(match wakeup {
            Ok(signal) if signal == K::SIGNAL => Some(()),
            // Lagged receivers miss nothing that the next resync would not fix
            _ => None,
        })
    });

    Box::pin(
        controller
            .watches(Api::<K>::all(client.clone()), watcher_config(), move |_| {
                all_objects(&siblings)
            })
            .watches(
                Api::<Telemetry>::namespaced(client.clone(), &namespace),
                watcher_config(),
                move |_| all_objects(&for_module),
            )
            .watches(Api::<Secret>::all(client.clone()), watcher_config(), move |secret| {
                let ns = secret.metadata.namespace.as_deref().unwrap_or_default();
                let name = secret.metadata.name.as_deref().unwrap_or_default();
                secret_watch
                    .secret_watch
                    .pipelines_for(K::SIGNAL, ns, name)
                    .into_iter()
                    .map(|pipeline| ObjectRef::<K>::new(&pipeline))
                    .collect::<Vec<_>>()
            })
            .watches(
                Api::<Deployment>::namespaced(client.clone(), &namespace),
                watcher_config(),
                |deployment| owning_pipelines::<K>(&deployment.metadata),
            )
            .watches(
                Api::<DaemonSet>::namespaced(client.clone(), &namespace),
                watcher_config(),
                |daemon_set| owning_pipelines::<K>(&daemon_set.metadata),
            )
            .reconcile_all_on(alerts)
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(name)),
    )
}

/// Build the LogPipeline, MetricPipeline and TracePipeline controllers
pub fn build_pipeline_controllers(client: Client, ctx: Arc<PipelineContext>) -> Vec<ControllerFuture> {
    tracing::info!("- LogPipeline controller");
    tracing::info!("- MetricPipeline controller");
    tracing::info!("- TracePipeline controller");

    vec![
        pipeline_controller::<LogPipeline>(&client, ctx.clone(), "LogPipeline"),
        pipeline_controller::<MetricPipeline>(&client, ctx.clone(), "MetricPipeline"),
        pipeline_controller::<TracePipeline>(&client, ctx, "TracePipeline"),
    ]
}

/// Build the Telemetry module controller
///
/// The module aggregates every pipeline and parser, so a change to any of
/// them re-reconciles all Telemetry objects.
pub fn build_module_controller(client: Client, ctx: Arc<PipelineContext>) -> Vec<ControllerFuture> {
    let namespace = ctx.config.target_namespace.clone();
    let controller = Controller::new(
        Api::<Telemetry>::namespaced(client.clone(), &namespace),
        watcher_config(),
    );
    let (logs, metrics, traces, parsers) = (
        controller.store(),
        controller.store(),
        controller.store(),
        controller.store(),
    );

    tracing::info!("- Telemetry module controller");

    vec![Box::pin(
        controller
            .watches(Api::<LogPipeline>::all(client.clone()), watcher_config(), move |_| {
                all_objects(&logs)
            })
            .watches(Api::<MetricPipeline>::all(client.clone()), watcher_config(), move |_| {
                all_objects(&metrics)
            })
            .watches(Api::<TracePipeline>::all(client.clone()), watcher_config(), move |_| {
                all_objects(&traces)
            })
            .watches(Api::<LogParser>::all(client), watcher_config(), move |_| {
                all_objects(&parsers)
            })
            .shutdown_on_signal()
            .run(reconcile_module, error_policy_module, ctx)
            .for_each(log_reconcile_result("Telemetry")),
    )]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
