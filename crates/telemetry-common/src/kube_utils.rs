//! Kubernetes helpers shared by the controllers

use std::future::Future;
use std::pin::Pin;

use futures::future::join_all;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::{debug, error};

use crate::Error;

/// Short, stable content hash used for `checksum/config` annotations.
///
/// SHA-256 truncated to the first 8 bytes, hex encoded (16 chars).
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    use std::fmt::Write;

    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

type ApplyFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// Server-side-apply operations queued and then run concurrently.
///
/// Objects go through `DynamicObject` with an explicit `ApiResource`, so one
/// batch can mix namespaced and cluster-scoped kinds.
pub struct ApplyBatch<'a> {
    client: Client,
    futures: Vec<ApplyFuture>,
    params: &'a PatchParams,
}

impl<'a> ApplyBatch<'a> {
    /// Empty batch applying with `params`
    pub fn new(client: Client, params: &'a PatchParams) -> Self {
        Self {
            client,
            futures: Vec::new(),
            params,
        }
    }

    /// Serialize `resource` and queue it; `namespace` is `None` for cluster-scoped kinds
    pub fn push(
        &mut self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
        resource: &impl serde::Serialize,
        ar: &ApiResource,
    ) -> Result<(), Error> {
        let mut json = serde_json::to_value(resource)
            .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
        if let Some(obj) = json.as_object_mut() {
            obj.insert(
                "apiVersion".to_string(),
                serde_json::Value::String(ar.api_version.clone()),
            );
            obj.insert(
                "kind".to_string(),
                serde_json::Value::String(ar.kind.clone()),
            );
        }

        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        };
        let params = self.params.clone();
        let name = name.to_string();
        let kind = kind.to_string();
        self.futures.push(Box::pin(async move {
            debug!(name = %name, kind = %kind, "applying resource");
            api.patch(&name, &params, &Patch::Apply(&json)).await?;
            Ok(())
        }));
        Ok(())
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Run every queued patch; returns how many were applied or the first error
    pub async fn run(self, layer: &str) -> Result<usize, Error> {
        let count = self.futures.len();
        if count == 0 {
            return Ok(0);
        }

        debug!(count, layer, "applying resources in parallel");
        let mut errors: Vec<Error> = join_all(self.futures)
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        if errors.is_empty() {
            return Ok(count);
        }
        for err in &errors {
            error!(error = %err, layer, "resource application failed");
        }
        Err(errors.swap_remove(0))
    }
}

/// Delete an object, treating "already gone" as success.
///
/// Returns `true` when something was actually deleted.
pub async fn delete_ignore_not_found(
    client: Client,
    ar: &ApiResource,
    name: &str,
    namespace: Option<&str>,
) -> Result<bool, Error> {
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client, ns, ar),
        None => Api::all_with(client, ar),
    };
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => {
            debug!(kind = %ar.kind, name, "deleted resource");
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_compact() {
        let a = deterministic_hash("receivers: {}");
        assert_eq!(a.len(), 16);
        assert_eq!(a, deterministic_hash("receivers: {}"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_changes_with_content() {
        assert_ne!(
            deterministic_hash("OTLP_ENDPOINT_A=https://a:4317"),
            deterministic_hash("OTLP_ENDPOINT_A=https://b:4317")
        );
    }
}
