//! Admission, cancellation, and health/readiness HTTP handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use ctask_core::{AdmissionError, CancelError, SubmitTaskRequest};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::AppState;

/// `POST /tasks`. Always responds 200; admission refusals are carried in
/// the body as `{"status":"rejected","reason":"..."}` per §6, except for
/// signature failure (401, handled by the auth middleware) and draining
/// (503, checked here first since it's cheap and avoids dispatcher work).
#[instrument(skip(state, req), fields(task_id = %req.task_id))]
pub async fn submit_task(
    State(state): State<AppState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<Value>, StatusCode> {
    if state.dispatcher.is_draining() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match state.dispatcher.submit_task(req).await {
        Ok(()) => {
            info!("task admitted");
            Ok(Json(json!({ "status": "accepted" })))
        }
        Err(AdmissionError::AtCapacity) => Ok(Json(
            json!({ "status": "rejected", "reason": "at_capacity" }),
        )),
        Err(AdmissionError::ServiceError(reason)) => {
            warn!(%reason, "admission service error");
            Ok(Json(json!({ "status": "rejected", "reason": reason })))
        }
    }
}

/// `POST /tasks/:id/cancel`.
#[instrument(skip(state))]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.dispatcher.cancel_task(&task_id).await {
        Ok(()) => Ok(Json(json!({ "status": "cancelled" }))),
        Err(CancelError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(CancelError::AlreadyCompleted) => Ok(Json(json!({
            "status": "rejected",
            "reason": "already_completed"
        }))),
    }
}

/// `GET /tasks/:id`. Not part of the distilled admission contract, but a
/// thin read endpoint the CLI's `status` subcommand needs to exist.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let task = state
        .dispatcher
        .get_task(&task_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!(task)))
}

/// `GET /health`. Pure liveness: the process is up and answering.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// `GET /ready`. False while draining, true otherwise; the orchestrator has
/// no "state failed to load" condition to report here since recovery runs
/// to completion (or the process exits) before the router is ever served.
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if state.dispatcher.is_draining() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "running": state.dispatcher.get_running_count(),
        "capacity": state.dispatcher.get_capacity(),
    })))
}
