//! Admission HTTP server and the concrete collaborator adapters that wire
//! a real GitHub source-forge, git-worktree working-copy manager, and
//! subprocess session manager into the Task Dispatcher.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapters;
mod auth;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use ctask_core::OrchestratorConfig;
use ctask_dispatcher::Dispatcher;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use auth::NonceCache;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state reachable from every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: OrchestratorConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub nonces: Arc<NonceCache>,
}

/// Build the admission router: signed `POST /tasks` and
/// `POST /tasks/:id/cancel`, an unsigned read-only `GET /tasks/:id`, and
/// unsigned `GET /health` / `GET /ready`.
#[must_use = "the router does nothing until served"]
pub fn build_router(state: AppState) -> Router {
    let admission = Router::new()
        .route("/tasks", post(handlers::submit_task))
        .route("/tasks/{id}/cancel", post(handlers::cancel_task))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_dispatch_signature,
        ));

    Router::new()
        .merge(admission)
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .with_state(state)
}
