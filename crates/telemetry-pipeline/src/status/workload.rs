//! Health of the Deployments and DaemonSets behind a pipeline
//!
//! A workload is healthy once every desired pod is updated and ready. While
//! it is not, its pods are inspected: a pod that keeps failing past the
//! startup grace period turns the workload unhealthy with a message naming
//! the problem, anything else is reported as a rollout in progress.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use thiserror::Error;

use telemetry_common::NAME_LABEL;

/// Pods younger than this (in minutes) are still starting and never count as broken
pub const STARTUP_GRACE_MINUTES: i64 = 5;

const IMAGE_PULL_REASONS: [&str; 3] = ["ErrImagePull", "ImagePullBackOff", "InvalidImageName"];

/// Observed health of one workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkloadHealth {
    /// Every desired pod is updated and ready
    Ready,
    /// Pods are being started or replaced without a known problem
    RolloutInProgress,
    /// A pod problem prevents the workload from becoming ready
    NotReady(String),
    /// The workload does not exist
    NotFound,
}

impl WorkloadHealth {
    /// Whether the condition derived from this health holds
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Ready | Self::RolloutInProgress)
    }
}

/// Problem detected on a pod
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PodProblem {
    #[error("Pod {pod} has been evicted: {message}")]
    Evicted { pod: String, message: String },

    #[error("Pod {pod} is in the pending state: {message}")]
    Pending { pod: String, message: String },

    #[error("Container {container} of pod {pod} is not running: {reason}")]
    ContainerNotRunning {
        pod: String,
        container: String,
        reason: String,
    },

    #[error("Container {container} of pod {pod} was OOMKilled")]
    OomKilled { pod: String, container: String },

    #[error("Container {container} of pod {pod} exited with code {code}")]
    ProcessExited {
        pod: String,
        container: String,
        code: i32,
    },

    #[error("Container {container} of pod {pod} is in a crash loop")]
    CrashLoop { pod: String, container: String },
}

/// Label selector of a component's pods
pub fn pod_selector(component_name: &str) -> String {
    format!("{}={}", NAME_LABEL, component_name)
}

/// Health of a gateway Deployment
pub fn deployment_health(
    deployment: Option<&Deployment>,
    pods: &[Pod],
    now: DateTime<Utc>,
) -> WorkloadHealth {
    let Some(deployment) = deployment else {
        return WorkloadHealth::NotFound;
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = deployment.status.clone().unwrap_or_default();
    let observed = generation_observed(deployment.metadata.generation, status.observed_generation);
    let ready = status.ready_replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);

    health_from_counts(observed && ready >= desired && updated >= desired, pods, now)
}

/// Health of an agent DaemonSet
pub fn daemon_set_health(
    daemon_set: Option<&DaemonSet>,
    pods: &[Pod],
    now: DateTime<Utc>,
) -> WorkloadHealth {
    let Some(daemon_set) = daemon_set else {
        return WorkloadHealth::NotFound;
    };
    let Some(status) = daemon_set.status.as_ref() else {
        return health_from_counts(false, pods, now);
    };
    let observed = generation_observed(daemon_set.metadata.generation, status.observed_generation);
    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(status.number_ready);

    health_from_counts(
        observed && status.number_ready >= desired && updated >= desired,
        pods,
        now,
    )
}

fn generation_observed(generation: Option<i64>, observed: Option<i64>) -> bool {
    match (generation, observed) {
        (Some(g), Some(o)) => o >= g,
        _ => true,
    }
}

fn health_from_counts(all_ready: bool, pods: &[Pod], now: DateTime<Utc>) -> WorkloadHealth {
    if all_ready {
        return WorkloadHealth::Ready;
    }
    match first_problem(pods, now) {
        Some(problem) => WorkloadHealth::NotReady(problem.to_string()),
        None => WorkloadHealth::RolloutInProgress,
    }
}

/// First problem among `pods`, checked in name order
pub fn first_problem(pods: &[Pod], now: DateTime<Utc>) -> Option<PodProblem> {
    let mut sorted: Vec<&Pod> = pods.iter().collect();
    sorted.sort_by_key(|p| p.name_any());
    sorted.into_iter().find_map(|pod| pod_problem(pod, now))
}

fn pod_problem(pod: &Pod, now: DateTime<Utc>) -> Option<PodProblem> {
    let name = pod.name_any();
    let status = pod.status.as_ref()?;

    if status.phase.as_deref() == Some("Failed") && status.reason.as_deref() == Some("Evicted") {
        return Some(PodProblem::Evicted {
            pod: name,
            message: status.message.clone().unwrap_or_default(),
        });
    }

    let started = status
        .start_time
        .as_ref()
        .or(pod.metadata.creation_timestamp.as_ref())
        .map(|t| t.0);
    if started.is_some_and(|t| now - t < Duration::minutes(STARTUP_GRACE_MINUTES)) {
        return None;
    }

    let containers = status.container_statuses.as_deref().unwrap_or_default();
    if let Some(problem) = containers.iter().find_map(|c| container_problem(&name, c)) {
        return Some(problem);
    }

    if status.phase.as_deref() == Some("Pending") {
        let message = status
            .conditions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|c| c.status == "False")
            .and_then(|c| c.message.clone())
            .or_else(|| status.message.clone())
            .unwrap_or_else(|| "pod has not been scheduled".to_string());
        return Some(PodProblem::Pending { pod: name, message });
    }
    None
}

fn container_problem(pod: &str, status: &ContainerStatus) -> Option<PodProblem> {
    let container = status.name.clone();
    let waiting = status.state.as_ref().and_then(|s| s.waiting.as_ref());
    let last_terminated = status
        .last_state
        .as_ref()
        .and_then(|s| s.terminated.as_ref());
    let terminated = status.state.as_ref().and_then(|s| s.terminated.as_ref());

    if let Some(reason) = waiting.and_then(|w| w.reason.as_deref()) {
        if IMAGE_PULL_REASONS.contains(&reason) {
            return Some(PodProblem::ContainerNotRunning {
                pod: pod.to_string(),
                container,
                reason: reason.to_string(),
            });
        }
        if reason == "CrashLoopBackOff" {
            return Some(match last_terminated {
                Some(t) if t.reason.as_deref() == Some("OOMKilled") => PodProblem::OomKilled {
                    pod: pod.to_string(),
                    container,
                },
                Some(t) if t.exit_code != 0 => PodProblem::ProcessExited {
                    pod: pod.to_string(),
                    container,
                    code: t.exit_code,
                },
                _ => PodProblem::CrashLoop {
                    pod: pod.to_string(),
                    container,
                },
            });
        }
    }

    match terminated.or(last_terminated) {
        Some(t) if t.reason.as_deref() == Some("OOMKilled") => Some(PodProblem::OomKilled {
            pod: pod.to_string(),
            container,
        }),
        Some(t) if t.exit_code != 0 && terminated.is_some() => Some(PodProblem::ProcessExited {
            pod: pod.to_string(),
            container,
            code: t.exit_code,
        }),
        _ => None,
    }
}
