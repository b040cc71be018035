//! Integration tests for the HTTP surface and the read-only endpoints.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestDeeploy, JOB_ID, NODES};
use deeploy_control::api::{self, AppState};
use deeploy_control::clock::Clock;
use deeploy_control::DeeployStatus;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post(t: &TestDeeploy, uri: &str, body: Value) -> (StatusCode, Value) {
    let app = api::router(AppState {
        engine: Arc::clone(&t.engine),
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn create_over_http_waits_for_confirmation() {
    let t = TestDeeploy::new();
    let body = t.signed(json!({
        "app_alias": "web",
        "job_id": JOB_ID,
        "target_nodes_count": 1,
        "plugins": common::fixtures::container_plugins(),
        "chainstore_response": true,
    }));

    let (status, envelope) = post(&t, "/create_pipeline", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["status"], "success", "{envelope}");
    assert_eq!(envelope["job_id"], JOB_ID);
    assert_eq!(envelope["request"]["app_alias"], "web");
    assert_eq!(envelope["auth"]["sender"], t.owner.address);
    assert_eq!(envelope["auth"]["sender_nodes_count"], 1);
}

#[tokio::test]
async fn return_request_echoes_the_signed_body() {
    let t = TestDeeploy::new();
    let body = t.signed(json!({
        "app_alias": "web",
        "job_id": JOB_ID,
        "target_nodes": [NODES[2].1],
        "plugins": common::fixtures::container_plugins(),
        "return_request": true,
    }));

    let (_, envelope) = post(&t, "/create_pipeline", body.clone()).await;

    assert_eq!(envelope["status"], "command_delivered", "{envelope}");
    assert_eq!(envelope["request"], body);
}

#[tokio::test]
async fn failures_are_reported_in_the_envelope() {
    let t = TestDeeploy::new();
    let body = t.signed(json!({
        "app_alias": "web",
        "job_id": JOB_ID,
        "target_nodes_count": 1,
        "plugins": [{
            "signature": "CONTAINER_APP_RUNNER",
            "CONTAINER_RESOURCES": {"cpu": 1, "memory": "513m"},
        }],
    }));

    let (status, envelope) = post(&t, "/create_pipeline", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope["status"], "fail");
    assert!(envelope["error"].as_str().unwrap().starts_with("PAYMENT4"));
    assert!(t.fleet.commands().is_empty());
}

#[tokio::test]
async fn get_apps_lists_only_the_signers_apps() {
    let t = TestDeeploy::new();
    let app_id = t.create_app(json!({})).await.app_id.unwrap();

    let (_, envelope) = post(&t, "/get_apps", t.signed(json!({}))).await;

    assert_eq!(envelope["status"], "success", "{envelope}");
    let app = &envelope["apps"][NODES[0].0][app_id.as_str()];
    assert_eq!(app["owner"], t.owner.address);
    assert_eq!(app["is_deeployed"], true);
    assert_eq!(app["deeploy_specs"]["job_id"], JOB_ID);

    // The oracle wallet owns no nodes.
    let (_, envelope) = post(&t, "/get_apps", t.signed_by_oracle(json!({}))).await;
    assert_eq!(envelope["status"], "fail");
    assert!(envelope["error"].as_str().unwrap().starts_with("AUTH3"));
}

#[tokio::test]
async fn stale_nonces_are_rejected() {
    let t = TestDeeploy::new();
    let stale = t.clock.now() - chrono::Duration::hours(13);
    let body = t.owner.sign(json!({}), stale);

    let (_, envelope) = post(&t, "/get_apps", body).await;

    assert_eq!(envelope["status"], "fail");
    assert!(envelope["error"].as_str().unwrap().starts_with("AUTH"));
}

#[tokio::test]
async fn oracle_job_details_are_oracle_only() {
    let t = TestDeeploy::new();
    t.create_app(json!({})).await;

    let envelope = t
        .engine
        .get_oracle_job_details(t.signed_by_oracle(json!({"job_id": JOB_ID})))
        .await;
    assert_eq!(envelope.status, DeeployStatus::Success, "{:?}", envelope.error);
    assert_eq!(envelope.extra["job_name"], "web");
    assert_eq!(envelope.extra["job_type"], 1);

    let envelope = t
        .engine
        .get_oracle_job_details(t.signed(json!({"job_id": JOB_ID})))
        .await;
    assert_eq!(envelope.status, DeeployStatus::Fail);
    assert!(envelope.error.unwrap().starts_with("AUTH4"));
}

#[tokio::test]
async fn stored_pipeline_is_served_to_its_owner() {
    let t = TestDeeploy::new();
    let app_id = t.create_app(json!({})).await.app_id.unwrap();

    let envelope = t
        .engine
        .get_r1fs_job_pipeline(t.signed(json!({"job_id": JOB_ID})))
        .await;

    assert_eq!(envelope.status, DeeployStatus::Success, "{:?}", envelope.error);
    let pipeline = &envelope.extra["pipeline"];
    assert_eq!(pipeline["NAME"], app_id);
    assert_eq!(pipeline["OWNER"], t.owner.address);
    assert_eq!(pipeline["APP_ALIAS"], "web");
    assert_eq!(pipeline["DEEPLOY_SPECS"]["job_id"], JOB_ID);

    // A different wallet is neither the snapshot owner nor the escrow owner.
    let stranger = common::fixtures::Signer::new(3);
    let envelope = t
        .engine
        .get_r1fs_job_pipeline(stranger.sign(json!({"job_id": JOB_ID}), t.clock.now()))
        .await;
    assert_eq!(envelope.status, DeeployStatus::Fail);
}
