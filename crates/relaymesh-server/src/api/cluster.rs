//! Cluster and Hub Endpoints
//!
//! Read-only views of membership, the hub's counters and build metadata.

use super::state::AppState;
use crate::hub::{GetHubStats, HubStats};
use crate::network::membership::ClusterMember;
use crate::version::{version_info, VersionInfo};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub local: String,
    pub members: Vec<ClusterMember>,
}

/// GET /cluster/members
pub async fn get_members(State(state): State<AppState>) -> Json<MembersResponse> {
    Json(MembersResponse {
        local: state.cluster.local_name().to_string(),
        members: state.cluster.members(),
    })
}

/// GET /hub/stats
pub async fn get_hub_stats(
    State(state): State<AppState>,
) -> Result<Json<HubStats>, (StatusCode, String)> {
    state.hub.ask(GetHubStats).await.map(Json).map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Failed to get hub stats: {e}"),
        )
    })
}

/// GET /version
pub async fn get_version() -> Json<VersionInfo> {
    Json(version_info())
}
