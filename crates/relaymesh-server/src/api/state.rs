//! Application State
//!
//! Shared state passed to all API handlers.

use crate::hub::{Hub, HubConfig};
use crate::network::membership::ClusterMembership;
use crate::observability::MetricsState;
use kameo::prelude::*;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: ActorRef<Hub>,
    pub cluster: Arc<dyn ClusterMembership>,
    pub hub_config: HubConfig,
    pub metrics_state: Option<MetricsState>,
    /// Set once the node has joined the cluster
    pub readiness: Arc<AtomicBool>,
}
