//! Member Table
//!
//! Tracks every connected peer and which of them are admitted cluster
//! members. Shared between the swarm event loop, which mutates it, and the
//! membership handle, which reads it synchronously.

use super::peer::{ConnectionStatus, PeerInfo};
use crate::network::membership::ClusterMember;
use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId};
use std::time::Instant;
use tracing::{debug, trace};

/// Connection and health state for a single peer
#[derive(Debug, Clone)]
pub struct PeerConnectionState {
    pub peer_info: PeerInfo,
    pub status: ConnectionStatus,
    pub consecutive_failures: u32,
    pub last_seen: Instant,
    pub last_failure: Option<Instant>,
    pub connected_at: Instant,
}

impl PeerConnectionState {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_info: PeerInfo {
                peer_id,
                address: None,
            },
            status: ConnectionStatus::Connecting,
            consecutive_failures: 0,
            last_seen: Instant::now(),
            last_failure: None,
            connected_at: Instant::now(),
        }
    }

    pub fn is_member(&self) -> bool {
        self.status == ConnectionStatus::Member
    }

    pub fn member(&self) -> ClusterMember {
        ClusterMember {
            name: self.peer_info.peer_id.to_base58(),
            address: self
                .peer_info
                .address
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }

    /// Record a failed send. Returns true once `max_failures` is reached.
    pub fn mark_failure(&mut self, max_failures: u32) -> bool {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        self.last_seen = Instant::now();

        if self.consecutive_failures >= max_failures {
            self.status = ConnectionStatus::Failed;
            true
        } else {
            false
        }
    }

    pub fn mark_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_seen = Instant::now();
        self.last_failure = None;
    }
}

pub struct MemberTable {
    local: ClusterMember,
    peers: DashMap<PeerId, PeerConnectionState>,
}

impl MemberTable {
    pub fn new(local: ClusterMember) -> Self {
        Self {
            local,
            peers: DashMap::new(),
        }
    }

    pub fn local(&self) -> &ClusterMember {
        &self.local
    }

    pub fn mark_connected(&self, peer_id: PeerId) {
        self.peers
            .entry(peer_id)
            .or_insert_with(|| PeerConnectionState::new(peer_id))
            .last_seen = Instant::now();
    }

    /// Admit an identified peer. Returns the member when it is newly admitted.
    pub fn admit(&self, peer_id: PeerId, address: Option<Multiaddr>) -> Option<ClusterMember> {
        let mut state = self
            .peers
            .entry(peer_id)
            .or_insert_with(|| PeerConnectionState::new(peer_id));
        if address.is_some() {
            state.peer_info.address = address;
        }
        if state.is_member() {
            return None;
        }
        state.status = ConnectionStatus::Member;
        state.consecutive_failures = 0;
        debug!(
            peer_id_short = short_id(&peer_id),
            "Admitted peer as cluster member"
        );
        Some(state.member())
    }

    /// Forget a peer whose last connection closed. Returns its member name if
    /// it had been admitted.
    pub fn remove(&self, peer_id: &PeerId) -> Option<String> {
        let (_, state) = self.peers.remove(peer_id)?;
        trace!(
            peer_id_short = short_id(peer_id),
            status = ?state.status,
            "Removed peer from member table"
        );
        (state.status != ConnectionStatus::Connecting).then(|| peer_id.to_base58())
    }

    /// Record a failed send. Returns true when the peer should be disconnected.
    pub fn mark_failure(&self, peer_id: &PeerId, max_failures: u32) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(mut state) => {
                let exhausted = state.mark_failure(max_failures);
                debug!(
                    peer_id_short = short_id(peer_id),
                    consecutive_failures = state.consecutive_failures,
                    status = ?state.status,
                    "Peer send failure recorded"
                );
                exhausted
            }
            None => false,
        }
    }

    pub fn mark_success(&self, peer_id: &PeerId) {
        if let Some(mut state) = self.peers.get_mut(peer_id) {
            state.mark_success();
        }
    }

    pub fn is_member(&self, peer_id: &PeerId) -> bool {
        self.peers.get(peer_id).is_some_and(|s| s.is_member())
    }

    /// Admitted members, the local node first.
    pub fn members(&self) -> Vec<ClusterMember> {
        let mut members = vec![self.local.clone()];
        members.extend(
            self.peers
                .iter()
                .filter(|s| s.is_member())
                .map(|s| s.member()),
        );
        members
    }

    pub fn peer_count(&self) -> usize {
        self.peers.iter().filter(|s| s.is_member()).count()
    }
}

/// Last six characters of a base58 peer id, for log lines.
pub fn short_id(peer_id: &PeerId) -> String {
    let b58 = peer_id.to_base58();
    b58[b58.len().saturating_sub(6)..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MemberTable {
        MemberTable::new(ClusterMember {
            name: "local".to_string(),
            address: "/ip4/127.0.0.1/tcp/8081".to_string(),
        })
    }

    #[test]
    fn test_admit_once() {
        let table = table();
        let peer = PeerId::random();
        table.mark_connected(peer);
        assert!(!table.is_member(&peer));

        let addr: Multiaddr = "/ip4/10.0.0.2/tcp/8081".parse().unwrap();
        let member = table.admit(peer, Some(addr)).unwrap();
        assert_eq!(member.name, peer.to_base58());
        assert_eq!(member.address, "/ip4/10.0.0.2/tcp/8081");

        assert!(table.admit(peer, None).is_none());
        assert_eq!(table.members().len(), 2);
    }

    #[test]
    fn test_unadmitted_peer_leaves_silently() {
        let table = table();
        let peer = PeerId::random();
        table.mark_connected(peer);
        assert!(table.remove(&peer).is_none());

        table.admit(peer, None);
        assert_eq!(table.remove(&peer), Some(peer.to_base58()));
        assert_eq!(table.peer_count(), 0);
    }

    #[test]
    fn test_failures_trip_threshold() {
        let table = table();
        let peer = PeerId::random();
        table.admit(peer, None);

        assert!(!table.mark_failure(&peer, 2));
        table.mark_success(&peer);
        assert!(!table.mark_failure(&peer, 2));
        assert!(table.mark_failure(&peer, 2));
        assert!(!table.is_member(&peer));
    }
}
