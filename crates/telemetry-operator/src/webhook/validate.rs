//! Validating admission handlers
//!
//! Each endpoint decodes the AdmissionReview, converts the submitted object
//! into its typed resource and runs the same checks the reconcilers rely on.
//! Nothing is ever mutated.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use telemetry_common::crd::{LogParser, LogPipeline, MetricPipeline, TracePipeline};
use telemetry_common::Error;
use telemetry_pipeline::validation;

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::InvalidReview(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            WebhookError::Serialization(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

type ReviewResult = Result<Json<AdmissionReview<DynamicObject>>, WebhookError>;

/// Decode `review`, type its object as `K` and answer with `check`'s verdict
fn review<K>(
    review: AdmissionReview<DynamicObject>,
    check: fn(&K) -> Result<(), Error>,
) -> ReviewResult
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let request: AdmissionRequest<DynamicObject> = review
        .try_into()
        .map_err(|e| WebhookError::InvalidReview(format!("{}", e)))?;
    let allowed = AdmissionResponse::from(&request);

    let Some(object) = &request.object else {
        debug!(uid = %request.uid, "no object in request, allowing");
        return Ok(Json(allowed.into_review()));
    };

    let typed: K = match serde_json::from_value(serde_json::to_value(object)?) {
        Ok(typed) => typed,
        Err(e) => {
            info!(uid = %request.uid, kind = %K::kind(&()), error = %e, "rejecting undecodable object");
            return Ok(Json(
                allowed
                    .deny(format!("failed to decode {}: {}", K::kind(&()), e))
                    .into_review(),
            ));
        }
    };

    match check(&typed) {
        Ok(()) => Ok(Json(allowed.into_review())),
        Err(e) => {
            info!(
                uid = %request.uid,
                kind = %K::kind(&()),
                name = ?object.metadata.name,
                error = %e,
                "rejecting object"
            );
            Ok(Json(allowed.deny(e.to_string()).into_review()))
        }
    }
}

/// `/validate-logpipeline`
pub async fn validate_log_pipeline(Json(body): Json<AdmissionReview<DynamicObject>>) -> ReviewResult {
    review::<LogPipeline>(body, validation::validate_log_pipeline)
}

/// `/validate-logparser`
pub async fn validate_log_parser(Json(body): Json<AdmissionReview<DynamicObject>>) -> ReviewResult {
    review::<LogParser>(body, validation::validate_log_parser)
}

/// `/validate-metricpipeline`
pub async fn validate_metric_pipeline(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> ReviewResult {
    review::<MetricPipeline>(body, validation::validate_metric_pipeline)
}

/// `/validate-tracepipeline`
pub async fn validate_trace_pipeline(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> ReviewResult {
    review::<TracePipeline>(body, validation::validate_trace_pipeline)
}
