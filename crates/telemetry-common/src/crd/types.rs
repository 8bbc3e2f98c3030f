//! Types shared by the pipeline CRDs: conditions, value indirections and the OTLP output

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The condition could not be evaluated
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Status condition, shaped like `metav1.Condition`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. ConfigurationGenerated, GatewayHealthy)
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason code
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the (type, status, reason, message) tuple changed
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the resource this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Set the observed generation
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// True if status, reason and message all match `other`
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Shorthand for `status == True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Reference to one key of a Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    #[serde(default)]
    pub name: String,
    /// Secret namespace
    #[serde(default)]
    pub namespace: String,
    /// Key within the secret data
    #[serde(default)]
    pub key: String,
}

impl SecretKeyRef {
    /// All three coordinates are non-empty
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty() && !self.key.is_empty()
    }
}

impl std::fmt::Display for SecretKeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.namespace, self.key)
    }
}

/// Indirection to a value stored elsewhere
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSource {
    /// Key of a Secret holding the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// A value given inline or through a secret reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueType {
    /// Inline value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Value read from a secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFromSource>,
}

impl ValueType {
    /// Inline value
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            value_from: None,
        }
    }

    /// Value taken from `key` of secret `namespace/name`
    pub fn from_secret(
        name: impl Into<String>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            value: None,
            value_from: Some(ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: name.into(),
                    namespace: namespace.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    /// The inline value if it is non-empty
    pub fn inline_value(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    /// The secret reference, if any
    pub fn secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
    }

    /// Either a non-empty inline value or a secret reference is present
    pub fn is_defined(&self) -> bool {
        self.inline_value().is_some() || self.secret_key_ref().is_some()
    }

    /// Both an inline value and a secret reference are present
    pub fn has_value_and_ref(&self) -> bool {
        self.inline_value().is_some() && self.value_from.is_some()
    }
}

/// Extra header sent by an exporter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// Header name
    pub name: String,

    /// Optional prefix placed before the value (e.g. "Bearer")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Header value
    #[serde(flatten)]
    pub value: ValueType,
}

/// Basic authentication credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    /// User name
    pub user: ValueType,
    /// Password
    pub password: ValueType,
}

/// Authentication options of an OTLP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuth>,
}

/// TLS settings of an OTLP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtlpTls {
    /// Disable TLS entirely
    #[serde(default)]
    pub insecure: bool,

    /// Skip server certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// PEM CA certificate used to verify the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueType>,

    /// PEM client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ValueType>,

    /// PEM client private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueType>,
}

/// Wire protocol of an OTLP output
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// OTLP over gRPC
    #[default]
    Grpc,
    /// OTLP over HTTP
    Http,
}

impl std::fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grpc => write!(f, "grpc"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// OTLP backend an output ships to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OtlpOutput {
    /// Protocol, `grpc` unless set
    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// Backend endpoint URL
    pub endpoint: ValueType,

    /// URL path appended to the endpoint (HTTP only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Authentication options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,

    /// Additional headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    /// TLS options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<OtlpTls>,
}

impl OtlpOutput {
    /// Output targeting `endpoint` with the given protocol and no extras
    pub fn new(protocol: OtlpProtocol, endpoint: impl Into<String>) -> Self {
        Self {
            protocol,
            endpoint: ValueType::inline(endpoint),
            ..Default::default()
        }
    }

    /// Basic auth credentials, if configured
    pub fn basic_auth(&self) -> Option<&BasicAuth> {
        self.authentication.as_ref().and_then(|a| a.basic.as_ref())
    }

    /// Non-empty path, if configured
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }

    /// Every value in this output that may reference a secret
    pub fn values(&self) -> Vec<&ValueType> {
        let mut values = vec![&self.endpoint];
        if let Some(basic) = self.basic_auth() {
            values.push(&basic.user);
            values.push(&basic.password);
        }
        values.extend(self.headers.iter().map(|h| &h.value));
        if let Some(tls) = &self.tls {
            values.extend([&tls.ca, &tls.cert, &tls.key].into_iter().flatten());
        }
        values
    }
}

/// Namespace include/exclude selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Only these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// All namespaces except these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl NamespaceSelector {
    /// Selector matching only `namespaces`
    pub fn include(namespaces: &[&str]) -> Self {
        Self {
            include: namespaces.iter().map(|s| s.to_string()).collect(),
            exclude: vec![],
        }
    }

    /// Selector matching everything but `namespaces`
    pub fn exclude(namespaces: &[&str]) -> Self {
        Self {
            include: vec![],
            exclude: namespaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// True when the selector filters nothing
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// OTTL statements applied by a user-defined transform processor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Where clauses ORed together; the statements only run when one holds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    /// Editor invocations, each with an optional `where` clause
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
}

/// OTTL conditions of a user-defined filter processor
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Conditions ORed together; matching data is dropped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

/// Namespaces hosting platform components, excluded from inputs by default
pub const SYSTEM_NAMESPACES: [&str; 4] = ["kyma-system", "kube-system", "istio-system", "compass-system"];
