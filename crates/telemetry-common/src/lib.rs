//! Shared types for the telemetry operator: CRDs, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the operator deploys collectors into unless configured otherwise
pub const DEFAULT_TARGET_NAMESPACE: &str = "kyma-system";

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "telemetry-manager";

/// Label key carrying the component name on derived objects
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// Label key identifying the manager of derived objects
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label key grouping all derived objects of the module
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";

/// Label marking a pipeline that survives upgrade scenarios; passed through untouched
pub const PERSISTENT_LABEL: &str = "telemetry.kyma-project.io/persistent";

/// Label that opts a metrics service into self-monitor scraping
pub const SELF_MONITOR_LABEL: &str = "telemetry.kyma-project.io/self-monitor";

/// Annotation selecting the legacy condition layout on a pipeline
pub const CONDITION_LAYOUT_ANNOTATION: &str = "telemetry.kyma-project.io/condition-layout";
