//! Hub Message Types
//!
//! Everything the hub actor consumes. Client adapters send `Register`,
//! `Unregister` and `RouteMessage`; the peer pump sends `InboundPeerBytes`;
//! the membership pump sends `MemberJoined` and `MemberLeft`; the tickers send
//! `ExpirePending` and `AntiEntropyTick`.

use super::connection::{ConnectionHandle, ConnectionId};
use crate::network::membership::ClusterMember;
use kameo::Reply;
use relaymesh_core::{ClientId, Message};
use serde::Serialize;

/// Attach a local connection. The last registration for an id wins.
#[derive(Debug)]
pub struct Register {
    pub handle: ConnectionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Reply)]
pub struct RegisterAck {
    /// Buffered messages delivered on attach
    pub flushed: usize,
    /// An older local connection for the same id was displaced
    pub replaced: bool,
}

/// Detach a local connection. Ignored unless `connection` is still current.
#[derive(Debug, Clone)]
pub struct Unregister {
    pub client_id: ClientId,
    pub connection: ConnectionId,
}

/// A message submitted by a local client.
#[derive(Debug, Clone)]
pub struct RouteMessage {
    pub message: Message,
}

/// Per-message routing outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Reply)]
pub struct RouteReport {
    pub delivered: usize,
    pub forwarded: usize,
    pub buffered: usize,
    pub dropped: usize,
}

/// Raw payload received from a peer.
#[derive(Debug, Clone)]
pub struct InboundPeerBytes {
    pub from: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MemberJoined {
    pub member: ClusterMember,
}

#[derive(Debug, Clone)]
pub struct MemberLeft {
    pub name: String,
}

/// Age out buffered messages.
#[derive(Debug, Clone, Copy)]
pub struct ExpirePending;

/// Push the local snapshot to every peer.
#[derive(Debug, Clone, Copy)]
pub struct AntiEntropyTick;

#[derive(Debug, Clone, Copy)]
pub struct GetHubStats;

#[derive(Debug, Clone, Serialize, Reply)]
pub struct HubStats {
    pub node_name: String,
    pub local_clients: usize,
    pub remote_clients: usize,
    pub pending_clients: usize,
    pub pending_messages: usize,
    pub members: usize,
}
