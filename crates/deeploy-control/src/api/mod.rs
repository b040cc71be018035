//! HTTP API for the orchestration engine.
//!
//! Provides endpoints for:
//! - Signed deeploy requests (one POST route per operation)
//! - Health and readiness checks
//! - Prometheus metrics

mod deeploy;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::engine::DeeployEngine;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DeeployEngine>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Deeploy operations
        .route("/get_apps", post(deeploy::get_apps))
        .route("/create_pipeline", post(deeploy::create_pipeline))
        .route("/update_pipeline", post(deeploy::update_pipeline))
        .route("/scale_up_job_workers", post(deeploy::scale_up_job_workers))
        .route("/delete_pipeline", post(deeploy::delete_pipeline))
        .route("/send_instance_command", post(deeploy::send_instance_command))
        .route("/send_app_command", post(deeploy::send_app_command))
        .route("/get_oracle_job_details", post(deeploy::get_oracle_job_details))
        .route("/get_r1fs_job_pipeline", post(deeploy::get_r1fs_job_pipeline))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health_check() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse { status: "healthy" })
}

/// Ready once the pending store answers.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> (axum::http::StatusCode, axum::Json<ReadyResponse>) {
    match state.engine.scheduler().pending_count().await {
        Ok(pending_requests) => (
            axum::http::StatusCode::OK,
            axum::Json(ReadyResponse {
                ready: true,
                pending_requests,
            }),
        ),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(ReadyResponse {
                ready: false,
                pending_requests: 0,
            }),
        ),
    }
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    let mut output = String::new();

    let pending = state
        .engine
        .scheduler()
        .pending_count()
        .await
        .unwrap_or(0);
    output.push_str("# HELP deeploy_pending_requests Requests awaiting node confirmation\n");
    output.push_str("# TYPE deeploy_pending_requests gauge\n");
    let _ = writeln!(output, "deeploy_pending_requests {pending}");

    let jobs = state
        .engine
        .orchestrator()
        .jobs()
        .list()
        .await
        .map(|jobs| jobs.len())
        .unwrap_or(0);
    output.push_str("# HELP deeploy_stored_jobs Jobs with a stored pipeline snapshot\n");
    output.push_str("# TYPE deeploy_stored_jobs gauge\n");
    let _ = writeln!(output, "deeploy_stored_jobs {jobs}");

    output
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    pending_requests: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::DeeployConfig;
    use crate::engine::Collaborators;
    use crate::pending::MemoryPendingStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_app_state() -> AppState {
        let engine = DeeployEngine::new(
            &Collaborators::in_memory(),
            Arc::new(MemoryPendingStore::new()),
            &DeeployConfig::default(),
        );
        AppState {
            engine: Arc::new(engine),
        }
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = router(make_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_endpoint() {
        let app = router(make_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ready")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert!(body_text(response).await.contains("\"pending_requests\":0"));
    }

    #[tokio::test]
    async fn metrics_endpoint() {
        let app = router(make_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("deeploy_pending_requests 0"));
        assert!(text.contains("deeploy_stored_jobs 0"));
    }

    #[tokio::test]
    async fn unsigned_request_fails_in_the_envelope() {
        let app = router(make_app_state());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/get_apps")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"nonce":"0x1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "fail");
        assert!(body["error"].as_str().unwrap().contains("signature"));
    }
}
