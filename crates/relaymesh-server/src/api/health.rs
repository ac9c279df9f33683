//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers for Kubernetes.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::sync::atomic::Ordering;

/// Liveness probe. Fails once the hub actor has stopped.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.hub.is_alive() {
        Ok("OK")
    } else {
        tracing::warn!("Hub actor is not running");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Readiness probe. Returns OK after the initial cluster join.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
