//! Error types for the telemetry operator
//!
//! Variants carry the pipeline or resource they concern so that a log line
//! alone is enough to find the offending object.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for telemetry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A pipeline or module spec is not acceptable
    #[error("validation error for {pipeline}: {message}")]
    Validation {
        /// Name of the pipeline (or module) with invalid configuration
        pipeline: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.output.otlp.endpoint")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A referenced secret or one of its keys could not be read
    #[error("secret reference {namespace}/{secret}[{key}]: {message}")]
    SecretRef {
        /// Secret name
        secret: String,
        /// Secret namespace
        namespace: String,
        /// Key inside the secret
        key: String,
        /// Description of what failed
        message: String,
    },

    /// Rendering a collector configuration failed
    #[error("render error [{signal}]: {message}")]
    Render {
        /// Signal whose configuration failed to render
        signal: String,
        /// Description of what failed
        message: String,
    },

    /// A reconcile pass exceeded its deadline
    #[error("reconcile of {pipeline} timed out after {seconds}s")]
    Timeout {
        /// Pipeline being reconciled
        pipeline: String,
        /// Deadline in seconds
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "webhook", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error without pipeline context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            pipeline: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named pipeline
    pub fn validation_for(pipeline: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            pipeline: pipeline.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named pipeline and field path
    pub fn validation_for_field(
        pipeline: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            pipeline: pipeline.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a render error for a signal
    pub fn render(signal: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            signal: signal.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and render errors need a spec change.
    /// Kubernetes 4xx responses (other than conflicts) are permanent too.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Render { .. } => false,
            Error::SecretRef { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the pipeline name if this error is associated with one
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            Error::Validation { pipeline, .. } | Error::Timeout { pipeline, .. } => Some(pipeline),
            _ => None,
        }
    }

    /// True when the error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
