//! Self-monitor alert receiver
//!
//! The self-monitor pushes Alertmanager-style alert batches to
//! `/api/v2/alerts`. Batches land in the shared [`AlertStore`], which wakes
//! the controllers of the signals they touch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use tracing::{debug, info, warn};

use telemetry_pipeline::selfmon::{Alert, AlertStore};

/// Path the self-monitor posts alerts to
pub const ALERTS_PATH: &str = "/api/v2/alerts";

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'";

async fn receive_alerts(State(store): State<Arc<AlertStore>>, body: Bytes) -> StatusCode {
    let alerts: Vec<Alert> = match serde_json::from_slice(&body) {
        Ok(alerts) => alerts,
        Err(e) => {
            warn!(error = %e, "failed to decode self-monitor alerts");
            return StatusCode::BAD_REQUEST;
        }
    };

    let touched = store.record(&alerts, Utc::now());
    debug!(alerts = alerts.len(), signals = ?touched, "recorded self-monitor alerts");
    StatusCode::OK
}

async fn with_security_headers(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    response
}

/// Router of the alert receiver
pub fn router(store: Arc<AlertStore>) -> Router {
    Router::new()
        .route(ALERTS_PATH, post(receive_alerts))
        .with_state(store)
        .layer(map_response(with_security_headers))
}

/// Serve the alert receiver on plain HTTP inside the cluster
pub async fn serve(addr: SocketAddr, store: Arc<AlertStore>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind alert receiver on {}: {}", addr, e))?;
    info!(%addr, "starting self-monitor alert receiver");
    axum::serve(listener, router(store))
        .await
        .map_err(|e| anyhow::anyhow!("alert receiver error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use telemetry_pipeline::Signal;
    use tower::ServiceExt;

    fn store() -> Arc<AlertStore> {
        Arc::new(AlertStore::new(Duration::from_secs(300)))
    }

    async fn send(store: Arc<AlertStore>, method: Method, body: &str) -> Response {
        router(store)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(ALERTS_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    // =========================================================================
    // Story Tests: Alert Receiver
    // =========================================================================

    /// Story: a posted alert is recorded and wakes the signal's controller
    #[tokio::test]
    async fn story_posted_alert_is_recorded() {
        let store = store();
        let mut wakeups = store.subscribe();
        let body = r#"[{"labels": {"alertname": "TraceGatewayThrottling", "pipeline_name": "backend"}}]"#;

        let response = send(store.clone(), Method::POST, body).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.len(), 1);
        assert_eq!(wakeups.try_recv().unwrap(), Signal::Traces);
    }

    /// Story: a resolved alert posted later clears the firing one
    #[tokio::test]
    async fn story_resolved_alert_is_cleared() {
        let store = store();
        let firing = r#"[{"labels": {"alertname": "LogFluentBitBufferInUse", "pipeline_name": "app"}}]"#;
        let resolved = r#"[{"labels": {"alertname": "LogFluentBitBufferInUse", "pipeline_name": "app"},
                            "endsAt": "2020-01-01T00:00:00Z"}]"#;

        send(store.clone(), Method::POST, firing).await;
        assert_eq!(store.len(), 1);

        let response = send(store.clone(), Method::POST, resolved).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());
    }

    /// Story: an empty batch is accepted
    #[tokio::test]
    async fn story_empty_batch_is_accepted() {
        let store = store();
        let response = send(store.clone(), Method::POST, "[]").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());
    }

    /// Story: garbage is a bad request
    #[tokio::test]
    async fn story_undecodable_body_is_rejected() {
        let response = send(store(), Method::POST, "{not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    /// Story: only POST is served, and every answer carries the CSP header
    #[tokio::test]
    async fn story_other_methods_are_not_allowed() {
        let response = send(store(), Method::GET, "").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers()[header::CONTENT_SECURITY_POLICY],
            "default-src 'self'"
        );

        let response = send(store(), Method::POST, "[]").await;
        assert_eq!(
            response.headers()[header::CONTENT_SECURITY_POLICY],
            "default-src 'self'"
        );
    }
}
