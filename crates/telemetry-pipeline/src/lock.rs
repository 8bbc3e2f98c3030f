//! Coordination between reconciles of pipelines sharing one workload
//!
//! - [`admitted_names`]: the oldest pipelines up to the signal's cap
//! - [`RenderGate`]: serializes renders of a signal and coalesces waiters

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::signal::Signal;

/// Upper bound on consecutive render passes under one lock acquisition
pub const MAX_RENDER_PASSES: usize = 3;

/// Names of the pipelines admitted under `cap`.
///
/// Pipelines being deleted never count. The remaining ones are ordered by
/// creation timestamp (name breaks ties) and the first `cap` are admitted,
/// so a newer pipeline can never displace an older one.
pub fn admitted_names<K: ResourceExt>(pipelines: &[K], cap: usize) -> BTreeSet<String> {
    let mut live: Vec<&K> = pipelines
        .iter()
        .filter(|p| p.meta().deletion_timestamp.is_none())
        .collect();
    live.sort_by(|a, b| {
        let ta = a.creation_timestamp().map(|t| t.0);
        let tb = b.creation_timestamp().map(|t| t.0);
        ta.cmp(&tb).then_with(|| a.name_any().cmp(&b.name_any()))
    });
    live.into_iter().take(cap).map(|p| p.name_any()).collect()
}

/// Serializes the render/apply pass of one signal.
///
/// Every caller marks the gate dirty before waiting for the lock. The
/// holder keeps re-rendering while the flag is set, so a waiter whose change
/// was already picked up finds the flag clear and skips its own pass.
#[derive(Debug, Default)]
pub struct RenderGate {
    lock: Mutex<()>,
    dirty: AtomicBool,
}

impl RenderGate {
    /// Idle gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that the admitted set or its inputs changed
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Whether a render is owed
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Run `render` until the gate is clean.
    ///
    /// Returns the last pass's output, or `None` when a concurrent holder
    /// already rendered on this caller's behalf.
    pub async fn run<T, E, F, Fut>(&self, mut render: F) -> Result<Option<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.mark_dirty();
        let _guard = self.lock.lock().await;

        let mut last = None;
        for pass in 0..MAX_RENDER_PASSES {
            if !self.dirty.swap(false, Ordering::SeqCst) {
                break;
            }
            if pass > 0 {
                debug!(pass, "inputs changed during render, rendering again");
            }
            last = Some(render().await?);
        }
        Ok(last)
    }
}

/// One [`RenderGate`] per signal
#[derive(Debug, Default)]
pub struct RenderGates {
    logs: RenderGate,
    metrics: RenderGate,
    traces: RenderGate,
}

impl RenderGates {
    /// Idle gates
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate of `signal`
    pub fn get(&self, signal: Signal) -> &RenderGate {
        match signal {
            Signal::Logs => &self.logs,
            Signal::Metrics => &self.metrics,
            Signal::Traces => &self.traces,
        }
    }
}
