//! Cluster Membership Contract
//!
//! The narrow interface the hub needs from the cluster layer: join from a
//! seed list, list live members, send a reliable point-to-point payload, and
//! flood a best-effort payload. Inbound payloads are handed to a [`Delegate`]
//! supplied when the membership is built.

use crate::observability::metrics;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// A live node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterMember {
    /// Unique for the life of the process
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(ClusterMember),
    Left(String),
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no seeds to join")]
    NoSeeds,

    #[error("none of {attempted} seeds responded")]
    JoinFailed { attempted: usize },

    #[error("invalid seed address {0}")]
    InvalidSeed(String),

    #[error("{0} is not a cluster member")]
    UnknownMember(String),

    #[error("peer send timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("frame is not a JSON document: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    #[error("cluster layer is shut down")]
    Closed,
}

/// Receives every application payload that arrives from a peer.
pub trait Delegate: Send + Sync + 'static {
    fn notify_message(&self, from: &str, bytes: Vec<u8>);
}

/// A payload received from a peer.
#[derive(Debug, Clone)]
pub struct PeerDelivery {
    pub from: String,
    pub bytes: Vec<u8>,
}

/// Delegate that queues payloads for the hub on a bounded channel.
///
/// The transport thread is never blocked; when the hub falls behind the
/// payload is dropped and counted.
#[derive(Clone)]
pub struct PeerInbox {
    tx: mpsc::Sender<PeerDelivery>,
}

impl PeerInbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PeerDelivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Delegate for PeerInbox {
    fn notify_message(&self, from: &str, bytes: Vec<u8>) {
        let delivery = PeerDelivery {
            from: from.to_string(),
            bytes,
        };
        if let Err(e) = self.tx.try_send(delivery) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "inbox_full",
                mpsc::error::TrySendError::Closed(_) => "inbox_closed",
            };
            warn!(from = %from, reason, "Dropping peer payload");
            metrics::record_peer_frame_dropped(reason);
        }
    }
}

#[async_trait]
pub trait ClusterMembership: Send + Sync + 'static {
    /// Name of this node as other members see it.
    fn local_name(&self) -> &str;

    /// Join through the given seeds and return how many responded.
    ///
    /// A seed equal to this node's own address counts as responding, which
    /// lets the first node of a cluster bootstrap alone.
    async fn join(&self, seeds: &[String]) -> Result<usize, ClusterError>;

    /// Live members, this node included.
    fn members(&self) -> Vec<ClusterMember>;

    /// Live members other than this node.
    fn peers(&self) -> Vec<ClusterMember> {
        self.members()
            .into_iter()
            .filter(|m| m.name != self.local_name())
            .collect()
    }

    fn member(&self, name: &str) -> Option<ClusterMember> {
        self.members().into_iter().find(|m| m.name == name)
    }

    fn is_member(&self, name: &str) -> bool {
        self.member(name).is_some()
    }

    /// Send one payload to one member over the reliable channel.
    async fn send_reliable(&self, member: &ClusterMember, bytes: Vec<u8>)
        -> Result<(), ClusterError>;

    /// Flood a payload to every member, best effort.
    fn queue_broadcast(&self, bytes: Vec<u8>) -> Result<(), ClusterError>;

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;

    /// Announce departure and stop participating.
    async fn leave(&self) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbox_drops_when_full() {
        let (inbox, mut rx) = PeerInbox::channel(1);
        inbox.notify_message("node-a", b"one".to_vec());
        inbox.notify_message("node-a", b"two".to_vec());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.from, "node-a");
        assert_eq!(first.bytes, b"one");
        assert!(rx.try_recv().is_err());
    }
}
