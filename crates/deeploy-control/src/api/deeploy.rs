//! Deeploy operation endpoints.
//!
//! Every route answers `200 OK` with an [`Envelope`]; failures are reported
//! through the envelope status, never through the HTTP status.

use axum::{extract::State, Json};
use serde_json::Value;
use tracing::debug;

use crate::engine::DeeployEngine;
use crate::envelope::Envelope;
use crate::pending::Outcome;

use super::AppState;

/// Hold the connection until a postponed request resolves.
async fn settle(engine: &DeeployEngine, outcome: Outcome) -> Envelope {
    let mut outcome = outcome;
    loop {
        match outcome {
            Outcome::Ready(envelope) => return envelope,
            Outcome::Postponed(pending_id) => {
                tokio::time::sleep(engine.scheduler().poll_interval()).await;
                debug!(pending_id = %pending_id, "polling postponed request");
                outcome = engine.solve(&pending_id).await;
            }
        }
    }
}

pub async fn get_apps(State(state): State<AppState>, Json(raw): Json<Value>) -> Json<Envelope> {
    Json(state.engine.get_apps(raw).await)
}

pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    let outcome = state.engine.create_pipeline(raw).await;
    Json(settle(&state.engine, outcome).await)
}

pub async fn update_pipeline(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    let outcome = state.engine.update_pipeline(raw).await;
    Json(settle(&state.engine, outcome).await)
}

pub async fn scale_up_job_workers(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    let outcome = state.engine.scale_up_job_workers(raw).await;
    Json(settle(&state.engine, outcome).await)
}

pub async fn delete_pipeline(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    Json(state.engine.delete_pipeline(raw).await)
}

pub async fn send_instance_command(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    Json(state.engine.send_instance_command(raw).await)
}

pub async fn send_app_command(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    Json(state.engine.send_app_command(raw).await)
}

pub async fn get_oracle_job_details(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    Json(state.engine.get_oracle_job_details(raw).await)
}

pub async fn get_r1fs_job_pipeline(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Json<Envelope> {
    Json(state.engine.get_r1fs_job_pipeline(raw).await)
}
