//! In-process Cluster
//!
//! A [`ClusterMembership`] whose nodes share one process. Used for
//! standalone single-node runs and for exercising the hub without sockets.

use super::membership::{ClusterError, ClusterMembership, ClusterMember, Delegate, MembershipEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

struct MemoryNode {
    member: ClusterMember,
    delegate: Arc<dyn Delegate>,
    events: broadcast::Sender<MembershipEvent>,
    peers: DashMap<String, ClusterMember>,
    joined: AtomicBool,
}

impl MemoryNode {
    fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    fn admit(&self, member: ClusterMember) {
        if self.peers.insert(member.name.clone(), member.clone()).is_none() {
            let _ = self.events.send(MembershipEvent::Joined(member));
        }
    }

    fn evict(&self, name: &str) {
        if self.peers.remove(name).is_some() {
            let _ = self.events.send(MembershipEvent::Left(name.to_string()));
        }
    }
}

/// Shared registry that in-process nodes join through.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    nodes: Arc<DashMap<String, Arc<MemoryNode>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. It becomes visible to others once it joins.
    pub fn node(
        &self,
        name: impl Into<String>,
        address: impl Into<String>,
        delegate: Arc<dyn Delegate>,
    ) -> MemoryCluster {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let node = Arc::new(MemoryNode {
            member: ClusterMember {
                name: name.into(),
                address: address.into(),
            },
            delegate,
            events,
            peers: DashMap::new(),
            joined: AtomicBool::new(false),
        });
        self.nodes.insert(node.member.name.clone(), node.clone());
        MemoryCluster {
            node,
            network: self.clone(),
        }
    }

    fn joined_node(&self, name: &str) -> Option<Arc<MemoryNode>> {
        self.nodes
            .get(name)
            .map(|n| n.value().clone())
            .filter(|n| n.is_joined())
    }

    fn responds(&self, seed: &str) -> bool {
        self.nodes
            .iter()
            .any(|n| n.is_joined() && (n.member.name == seed || n.member.address == seed))
    }
}

pub struct MemoryCluster {
    node: Arc<MemoryNode>,
    network: MemoryNetwork,
}

impl MemoryCluster {
    pub fn address(&self) -> &str {
        &self.node.member.address
    }
}

#[async_trait]
impl ClusterMembership for MemoryCluster {
    fn local_name(&self) -> &str {
        &self.node.member.name
    }

    async fn join(&self, seeds: &[String]) -> Result<usize, ClusterError> {
        if seeds.is_empty() {
            return Err(ClusterError::NoSeeds);
        }

        let me = &self.node.member;
        let responded = seeds
            .iter()
            .filter(|s| *s == &me.name || *s == &me.address || self.network.responds(s))
            .count();
        if responded == 0 {
            return Err(ClusterError::JoinFailed {
                attempted: seeds.len(),
            });
        }

        self.node.joined.store(true, Ordering::Release);

        let others: Vec<Arc<MemoryNode>> = self
            .network
            .nodes
            .iter()
            .filter(|n| n.is_joined() && n.member.name != me.name)
            .map(|n| n.value().clone())
            .collect();
        for other in others {
            other.admit(me.clone());
            self.node.admit(other.member.clone());
        }

        debug!(node = %me.name, responded, "Joined in-process cluster");
        Ok(responded)
    }

    fn members(&self) -> Vec<ClusterMember> {
        let mut members = vec![self.node.member.clone()];
        members.extend(self.node.peers.iter().map(|m| m.value().clone()));
        members
    }

    fn peers(&self) -> Vec<ClusterMember> {
        self.node.peers.iter().map(|m| m.value().clone()).collect()
    }

    fn is_member(&self, name: &str) -> bool {
        name == self.node.member.name || self.node.peers.contains_key(name)
    }

    async fn send_reliable(&self, member: &ClusterMember, bytes: Vec<u8>) -> Result<(), ClusterError> {
        if !self.node.is_joined() {
            return Err(ClusterError::Closed);
        }
        let target = self
            .network
            .joined_node(&member.name)
            .ok_or_else(|| ClusterError::UnknownMember(member.name.clone()))?;
        target.delegate.notify_message(&self.node.member.name, bytes);
        Ok(())
    }

    fn queue_broadcast(&self, bytes: Vec<u8>) -> Result<(), ClusterError> {
        if !self.node.is_joined() {
            return Err(ClusterError::Closed);
        }
        for peer in self.peers() {
            if let Some(target) = self.network.joined_node(&peer.name) {
                target
                    .delegate
                    .notify_message(&self.node.member.name, bytes.clone());
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.node.events.subscribe()
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        let name = self.node.member.name.clone();
        self.node.joined.store(false, Ordering::Release);
        self.network.nodes.remove(&name);
        for node in self.network.nodes.iter() {
            node.evict(&name);
        }
        self.node.peers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::membership::PeerInbox;

    #[tokio::test]
    async fn test_first_node_bootstraps_on_own_address() {
        let net = MemoryNetwork::new();
        let (inbox, _rx) = PeerInbox::channel(8);
        let a = net.node("a", "10.0.0.1:8081", Arc::new(inbox));

        assert_eq!(a.join(&["10.0.0.1:8081".to_string()]).await.unwrap(), 1);
        assert_eq!(a.members().len(), 1);
        assert!(a.peers().is_empty());
    }

    #[tokio::test]
    async fn test_join_fails_without_reachable_seed() {
        let net = MemoryNetwork::new();
        let (inbox, _rx) = PeerInbox::channel(8);
        let a = net.node("a", "10.0.0.1:8081", Arc::new(inbox));

        assert!(matches!(a.join(&[]).await, Err(ClusterError::NoSeeds)));
        assert!(matches!(
            a.join(&["10.0.0.9:8081".to_string()]).await,
            Err(ClusterError::JoinFailed { attempted: 1 })
        ));
    }

    #[tokio::test]
    async fn test_send_and_membership_events() {
        let net = MemoryNetwork::new();
        let (inbox_a, _rx_a) = PeerInbox::channel(8);
        let (inbox_b, mut rx_b) = PeerInbox::channel(8);
        let a = net.node("a", "addr-a", Arc::new(inbox_a));
        let b = net.node("b", "addr-b", Arc::new(inbox_b));
        let mut a_events = a.subscribe();

        a.join(&["addr-a".to_string()]).await.unwrap();
        b.join(&["addr-a".to_string()]).await.unwrap();

        assert_eq!(
            a_events.recv().await.unwrap(),
            MembershipEvent::Joined(ClusterMember {
                name: "b".into(),
                address: "addr-b".into()
            })
        );

        let member_b = a.member("b").unwrap();
        a.send_reliable(&member_b, b"ping".to_vec()).await.unwrap();
        let delivery = rx_b.recv().await.unwrap();
        assert_eq!(delivery.from, "a");
        assert_eq!(delivery.bytes, b"ping");

        b.leave().await.unwrap();
        assert_eq!(a_events.recv().await.unwrap(), MembershipEvent::Left("b".into()));
        assert!(!a.is_member("b"));
        assert!(a.send_reliable(&member_b, b"late".to_vec()).await.is_err());
    }
}
