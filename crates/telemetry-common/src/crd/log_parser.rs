//! LogParser Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a LogParser
///
/// `parser` holds Fluent Bit parser settings without the `Name` key; the name
/// is taken from the resource.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "LogParser",
    plural = "logparsers",
    status = "LogParserStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogParserSpec {
    /// Parser settings, one `key value` pair per line
    #[serde(default)]
    pub parser: String,
}

/// Status of a LogParser
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogParserStatus {
    /// Parser conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
