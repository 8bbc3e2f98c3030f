//! Secret-backed values: resolution and the per-pipeline watch set
//!
//! A pipeline names secret keys through `valueFrom.secretKeyRef`. Before a
//! pass renders anything, every referenced key is read once into
//! [`ResolvedSecrets`]. The [`SecretWatchSet`] remembers which secrets each
//! pipeline read so that a Secret event wakes exactly the pipelines that
//! depend on it, including the transition from missing to present.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{SecretKeyRef, ValueType};
use crate::signal::Signal;
use crate::Error;

/// Message for a value slot with neither an inline value nor a reference
pub const MSG_VALUE_UNDEFINED: &str = "either value or secret key reference must be defined";

/// Read access to Secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Get a Secret, `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;
}

/// [`SecretReader`] backed by the API server
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    /// Reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Every secret key a pass needs, keyed `name.namespace.key`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedSecrets {
    values: BTreeMap<SecretKeyRef, String>,
}

impl ResolvedSecrets {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value of `key`
    pub fn insert(&mut self, key: SecretKeyRef, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Value of `key`, if it was resolved
    pub fn get(&self, key: &SecretKeyRef) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Merge the keys resolved for another pipeline
    pub fn extend(&mut self, other: ResolvedSecrets) {
        self.values.extend(other.values);
    }

    /// Number of resolved keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing was resolved
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Concrete string behind a value slot: the inline value when non-empty,
    /// otherwise the referenced secret key.
    pub fn value(&self, value: &ValueType) -> Result<String, Error> {
        if let Some(inline) = value.inline_value() {
            return Ok(inline.to_string());
        }
        let Some(key) = value.secret_key_ref() else {
            return Err(Error::validation(MSG_VALUE_UNDEFINED));
        };
        self.get(key).map(str::to_string).ok_or_else(|| Error::SecretRef {
            secret: key.name.clone(),
            namespace: key.namespace.clone(),
            key: key.key.clone(),
            message: "value was not resolved".to_string(),
        })
    }

    /// Flat view keyed by the `name.namespace.key` display form
    pub fn flatten(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Distinct, complete secret references behind `values`, in stable order
pub fn secret_refs<'a>(values: impl IntoIterator<Item = &'a ValueType>) -> Vec<SecretKeyRef> {
    values
        .into_iter()
        .filter_map(ValueType::secret_key_ref)
        .filter(|r| r.is_complete())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Read every key in `refs`. Each Secret is fetched once.
///
/// A missing Secret or key fails with [`Error::SecretRef`]; API failures are
/// passed through as [`Error::Kube`].
pub async fn resolve(reader: &dyn SecretReader, refs: &[SecretKeyRef]) -> Result<ResolvedSecrets, Error> {
    let mut by_secret: BTreeMap<(&str, &str), Vec<&SecretKeyRef>> = BTreeMap::new();
    for r in refs {
        by_secret
            .entry((r.namespace.as_str(), r.name.as_str()))
            .or_default()
            .push(r);
    }

    let mut resolved = ResolvedSecrets::new();
    for ((namespace, name), keys) in by_secret {
        let secret = reader.get_secret(namespace, name).await?;
        let Some(secret) = secret else {
            debug!(namespace, name, "referenced secret not found");
            return Err(Error::SecretRef {
                secret: name.to_string(),
                namespace: namespace.to_string(),
                key: keys[0].key.clone(),
                message: "secret not found".to_string(),
            });
        };
        for key in keys {
            let value = secret_value(&secret, &key.key).ok_or_else(|| Error::SecretRef {
                secret: name.to_string(),
                namespace: namespace.to_string(),
                key: key.key.clone(),
                message: "key not found in secret".to_string(),
            })?;
            resolved.insert(key.clone(), value);
        }
    }
    Ok(resolved)
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(String::from_utf8_lossy(&bytes.0).into_owned());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

/// Which pipelines read which Secrets
#[derive(Debug, Default)]
pub struct SecretWatchSet {
    reads: DashMap<(Signal, String), BTreeSet<(String, String)>>,
}

impl SecretWatchSet {
    /// Empty watch set
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the secrets `pipeline` depends on
    pub fn track(&self, signal: Signal, pipeline: &str, refs: &[SecretKeyRef]) {
        let secrets: BTreeSet<(String, String)> = refs
            .iter()
            .map(|r| (r.namespace.clone(), r.name.clone()))
            .collect();
        if secrets.is_empty() {
            self.reads.remove(&(signal, pipeline.to_string()));
        } else {
            self.reads.insert((signal, pipeline.to_string()), secrets);
        }
    }

    /// Drop a deleted pipeline
    pub fn forget(&self, signal: Signal, pipeline: &str) {
        self.reads.remove(&(signal, pipeline.to_string()));
    }

    /// Drop every pipeline of `signal` that is no longer listed
    ///
    /// A pipeline removed while its controller was not running never shows
    /// up with a deletion timestamp, so the list itself is the authority.
    pub fn retain_listed(&self, signal: Signal, listed: &BTreeSet<String>) {
        self.reads
            .retain(|(s, pipeline), _| *s != signal || listed.contains(pipeline));
    }

    /// Number of pipelines with tracked reads
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether no pipeline has tracked reads
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Pipelines of `signal` that read the Secret `namespace/name`, sorted
    pub fn pipelines_for(&self, signal: Signal, namespace: &str, name: &str) -> Vec<String> {
        let mut pipelines: Vec<String> = self
            .reads
            .iter()
            .filter(|entry| {
                entry.key().0 == signal
                    && entry
                        .value()
                        .iter()
                        .any(|(ns, n)| ns == namespace && n == name)
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        pipelines.sort();
        pipelines
    }
}
