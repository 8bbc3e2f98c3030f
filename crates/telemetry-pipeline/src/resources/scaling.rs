//! Gateway replica count

use crate::crd::{Scaling, ScalingStrategy};

/// Lower bound of dynamically scaled gateways
pub const MIN_DYNAMIC_REPLICAS: i32 = 2;
/// Upper bound of dynamically scaled gateways
pub const MAX_DYNAMIC_REPLICAS: i32 = 5;

/// Replicas of a gateway serving `pipeline_count` admitted pipelines.
///
/// Static scaling uses the configured count (negative counts are rejected
/// earlier by module validation and clamp to zero here); dynamic scaling
/// follows the pipeline count within the dynamic bounds.
pub fn gateway_replicas(scaling: Option<&Scaling>, pipeline_count: usize) -> i32 {
    let strategy = scaling.and_then(|s| s.type_).unwrap_or_default();
    match (strategy, scaling.and_then(|s| s.r#static.as_ref())) {
        (ScalingStrategy::Static, Some(fixed)) => fixed.replicas.max(0),
        _ => {
            let count = i32::try_from(pipeline_count).unwrap_or(i32::MAX);
            count.clamp(MIN_DYNAMIC_REPLICAS, MAX_DYNAMIC_REPLICAS)
        }
    }
}
