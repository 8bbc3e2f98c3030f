//! Pipeline and module validation
//!
//! Admission rules run in the webhook and refuse malformed resources at
//! write time. Endpoint checks run at reconcile time, after secret values
//! have been resolved.

mod endpoint;
mod log;
mod module;
mod ottl;
mod otlp;
mod signal;

pub use endpoint::{validate_endpoint, EndpointError};
pub use log::{is_valid_hostname, validate_log_parser, validate_log_pipeline};
pub use module::validate_telemetry_spec;
pub use ottl::{validate_filters, validate_transforms, OttlError};
pub use otlp::{validate_otlp_output, validate_value, MSG_CERT_KEY_PAIR};
pub use signal::{validate_metric_pipeline, validate_trace_pipeline};
