//! Configuration rendering for collectors and Fluent Bit
//!
//! Renderers are pure: they take the admitted pipelines of one signal plus
//! the resolved secret values and return a [`RenderedConfig`]. Secret
//! material never lands in the configuration text; it goes into the
//! environment map, which becomes a Secret mounted as environment variables.

use std::collections::BTreeMap;

use telemetry_common::kube_utils::deterministic_hash;

pub mod env;
pub mod fluent_bit;
pub mod otel;

/// ConfigMap key holding a collector configuration
pub const COLLECTOR_CONFIG_KEY: &str = "relay.conf";

/// Output of one render pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedConfig {
    /// ConfigMap data
    pub files: BTreeMap<String, String>,
    /// Secret data exposed to the workload as environment variables
    pub env: BTreeMap<String, String>,
    /// Secret data mounted as files (Fluent Bit TLS material)
    pub secret_files: BTreeMap<String, String>,
    /// Hash over files and environment, stamped on the pod template
    pub checksum: String,
}

impl RenderedConfig {
    /// Bundle rendered files and environment and compute their checksum
    pub fn new(files: BTreeMap<String, String>, env: BTreeMap<String, String>) -> Self {
        let checksum = checksum(&files, &env);
        Self {
            files,
            env,
            secret_files: BTreeMap::new(),
            checksum,
        }
    }

    /// Attach secret-backed files; they count towards the checksum
    pub fn with_secret_files(mut self, secret_files: BTreeMap<String, String>) -> Self {
        let mut hashed = self.env.clone();
        hashed.extend(
            secret_files
                .iter()
                .map(|(name, content)| (format!("file:{}", name), content.clone())),
        );
        self.checksum = checksum(&self.files, &hashed);
        self.secret_files = secret_files;
        self
    }

    /// A collector configuration stored under [`COLLECTOR_CONFIG_KEY`]
    pub fn collector(config: String, env: BTreeMap<String, String>) -> Self {
        Self::new(
            BTreeMap::from([(COLLECTOR_CONFIG_KEY.to_string(), config)]),
            env,
        )
    }

    /// The collector configuration text, when present
    pub fn collector_config(&self) -> Option<&str> {
        self.files.get(COLLECTOR_CONFIG_KEY).map(String::as_str)
    }
}

/// Checksum over every file and environment entry.
///
/// Both maps iterate in key order, so equal inputs always hash equally.
pub fn checksum(files: &BTreeMap<String, String>, env: &BTreeMap<String, String>) -> String {
    let mut input = String::new();
    for (name, content) in files {
        input.push_str(name);
        input.push('\0');
        input.push_str(content);
        input.push('\0');
    }
    for (name, value) in env {
        input.push_str(name);
        input.push('=');
        input.push_str(value);
        input.push('\0');
    }
    deterministic_hash(&input)
}
