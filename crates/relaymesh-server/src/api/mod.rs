//! HTTP API Module
//!
//! - `ws`: WebSocket client endpoint
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `cluster`: Membership, hub counters and build metadata

mod cluster;
mod health;
mod metrics;
mod state;
mod ws;

pub use state::AppState;

use axum::{routing::get, Router};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Clients
        .route("/ws", get(ws::ws_handler))
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        .route("/version", get(cluster::get_version))
        // Cluster state
        .route("/cluster/members", get(cluster::get_members))
        .route("/hub/stats", get(cluster::get_hub_stats))
        .with_state(state)
}
