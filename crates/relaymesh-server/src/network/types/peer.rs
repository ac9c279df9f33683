//! Peer Information Types

use libp2p::{Multiaddr, PeerId};

/// What is known about a connected peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    /// Dialable address, from identify when available
    pub address: Option<Multiaddr>,
}

/// Membership status of a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Connected, identify not yet completed
    Connecting,
    /// Identified with a matching protocol version
    Member,
    /// Too many consecutive send failures
    Failed,
}
