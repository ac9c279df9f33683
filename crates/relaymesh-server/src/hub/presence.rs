//! Presence Propagation
//!
//! Sends single-id presence events on every local attach and detach, and a
//! chunked snapshot of all local ids on a fixed interval so peers converge
//! even when individual events are lost. Snapshots only ever add.

use super::directory::Directory;
use super::outbox::{FrameKind, Outbox};
use crate::network::membership::{ClusterMember, ClusterMembership};
use crate::observability::{events, metrics};
use relaymesh_core::{PeerEnvelope, PresenceEvent, PresenceOp};
use std::sync::Arc;
use tracing::error;

pub struct PresenceSync {
    node_name: String,
    cluster: Arc<dyn ClusterMembership>,
    outbox: Outbox,
    directory: Arc<Directory>,
    snapshot_chunk: usize,
}

impl PresenceSync {
    pub fn new(
        cluster: Arc<dyn ClusterMembership>,
        outbox: Outbox,
        directory: Arc<Directory>,
        snapshot_chunk: usize,
    ) -> Self {
        Self {
            node_name: cluster.local_name().to_string(),
            cluster,
            outbox,
            directory,
            snapshot_chunk,
        }
    }

    /// Tell every peer that `client_id` attached to or detached from this node.
    pub fn announce(&self, op: PresenceOp, client_id: &str) -> usize {
        let event = PresenceEvent::new(op, self.node_name.clone(), [client_id.to_string()]);
        self.send(&self.cluster.peers(), event)
    }

    /// Current local ids as chunked `Add` events.
    pub fn snapshot(&self) -> Vec<PresenceEvent> {
        PresenceEvent::snapshot(
            &self.node_name,
            self.directory.local_ids(),
            self.snapshot_chunk,
        )
    }

    /// Send the full local snapshot to every peer. Returns frames queued.
    pub fn broadcast_snapshot(&self) -> usize {
        let peers = self.cluster.peers();
        if peers.is_empty() {
            return 0;
        }
        let snapshot = self.snapshot();
        let ids: usize = snapshot.iter().map(|e| e.client_ids.len()).sum();
        let queued = snapshot
            .into_iter()
            .map(|event| self.send(&peers, event))
            .sum();
        events::anti_entropy_pass(&self.node_name, ids, peers.len());
        metrics::record_anti_entropy_pass();
        queued
    }

    /// Send the full local snapshot to one member.
    pub fn send_snapshot_to(&self, member: &ClusterMember) -> usize {
        let targets = [member.clone()];
        self.snapshot()
            .into_iter()
            .map(|event| self.send(&targets, event))
            .sum()
    }

    fn send(&self, targets: &[ClusterMember], event: PresenceEvent) -> usize {
        if targets.is_empty() || event.is_empty() {
            return 0;
        }
        match PeerEnvelope::Presence(event).encode() {
            Ok(bytes) => self.outbox.fan_out(targets, &bytes, FrameKind::Presence),
            Err(e) => {
                error!(error = %e, "Failed to encode presence event");
                0
            }
        }
    }
}
