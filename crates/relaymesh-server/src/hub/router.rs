//! Hub Actor
//!
//! The single serialized consumer of every routing event on a node. It owns
//! the pending buffer and is the only writer of the directory; peer sends are
//! handed to the outbox so the mailbox never waits on the network.
//!
//! Forwarding is single-hop: a message that arrived from a peer is delivered
//! locally or buffered, never forwarded again.

use super::config::HubConfig;
use super::connection::{ConnectionHandle, ConnectionId};
use super::directory::{Directory, Location};
use super::messages::{
    AntiEntropyTick, ExpirePending, GetHubStats, HubStats, InboundPeerBytes, MemberJoined,
    MemberLeft, Register, RegisterAck, RouteMessage, RouteReport, Unregister,
};
use super::outbox::{FrameKind, OutboundFrame, Outbox};
use super::pending::{BufferOutcome, PendingBuffer};
use super::presence::PresenceSync;
use crate::network::membership::ClusterMembership;
use crate::observability::{events, metrics};
use kameo::{
    message::{Context, Message},
    Actor,
};
use relaymesh_core::{
    ClientId, Message as RelayMessage, PeerEnvelope, PresenceEvent, PresenceOp,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

#[derive(Actor)]
pub struct Hub {
    node_name: String,
    directory: Arc<Directory>,
    pending: PendingBuffer,
    cluster: Arc<dyn ClusterMembership>,
    outbox: Outbox,
    presence: Arc<PresenceSync>,
    config: HubConfig,
}

impl Hub {
    pub fn new(
        cluster: Arc<dyn ClusterMembership>,
        directory: Arc<Directory>,
        outbox: Outbox,
        presence: Arc<PresenceSync>,
        config: HubConfig,
    ) -> Self {
        Self {
            node_name: cluster.local_name().to_string(),
            directory,
            pending: PendingBuffer::from_config(&config),
            cluster,
            outbox,
            presence,
            config,
        }
    }

    fn register(&mut self, handle: ConnectionHandle) -> RegisterAck {
        let client_id = handle.client_id.clone();
        let previous = self
            .directory
            .set(client_id.clone(), Location::Local(handle.clone()));
        let replaced = matches!(previous, Some(Location::Local(_)));
        if let Some(Location::Remote(node)) = &previous {
            events::ownership_moved(&client_id, node, &self.node_name);
        }

        let mut flushed = 0;
        for message in self.pending.take(&client_id) {
            match handle.try_enqueue(message.into_client_view()) {
                Ok(()) => flushed += 1,
                Err(e) => metrics::record_route(e.as_str()),
            }
        }
        self.update_pending_gauges();

        self.presence.announce(PresenceOp::Add, &client_id);
        events::client_registered(&client_id, &handle.id.to_string(), &self.node_name, flushed);
        metrics::record_client_connection("registered");
        metrics::set_local_clients(self.directory.stats().local);

        RegisterAck { flushed, replaced }
    }

    fn unregister(&mut self, client_id: &str, connection: ConnectionId) -> bool {
        if self
            .directory
            .remove_if_local_connection(client_id, connection)
            .is_none()
        {
            trace!(client_id = %client_id, connection = %connection, "Stale unregister ignored");
            return false;
        }

        self.presence.announce(PresenceOp::Remove, client_id);
        events::client_unregistered(client_id, &connection.to_string(), &self.node_name);
        metrics::record_client_connection("unregistered");
        metrics::set_local_clients(self.directory.stats().local);
        true
    }

    fn route(&mut self, message: RelayMessage) -> RouteReport {
        let mut report = RouteReport::default();

        if let Some(origin) = &message.orig_node_name {
            if origin == &self.node_name {
                debug!(origin = %origin, "Dropping message that looped back");
                metrics::record_route("loop");
                report.dropped += 1;
                return report;
            }
            if message.hops > self.config.max_hops {
                debug!(origin = %origin, hops = message.hops, "Dropping message over hop limit");
                metrics::record_route("hop_limit");
                report.dropped += 1;
                return report;
            }
        }
        let from_peer = message.is_from_peer();

        if message.is_broadcast() {
            self.broadcast(&message, from_peer, &mut report);
            return report;
        }

        let recipients: Vec<ClientId> = message.recipients().into_iter().cloned().collect();
        for client_id in recipients {
            self.route_one(&client_id, &message, from_peer, &mut report);
        }
        report
    }

    fn route_one(
        &mut self,
        client_id: &str,
        message: &RelayMessage,
        from_peer: bool,
        report: &mut RouteReport,
    ) {
        match self.directory.get(client_id) {
            Some(Location::Local(handle)) => {
                self.deliver_local(&handle, message.clone(), report);
            }
            Some(Location::Remote(node)) if from_peer => {
                // The sender's view is stale and we do not forward twice
                debug!(client_id = %client_id, owner = %node, "Dropping peer message for remote client");
                metrics::record_route("stale_owner");
                report.dropped += 1;
            }
            Some(Location::Remote(node)) => {
                if !self.forward(client_id, &node, message, report) {
                    self.buffer(client_id, message.clone(), report);
                }
            }
            None => self.buffer(client_id, message.clone(), report),
        }
    }

    fn deliver_local(
        &mut self,
        handle: &ConnectionHandle,
        message: RelayMessage,
        report: &mut RouteReport,
    ) {
        match handle.try_enqueue(message.into_client_view()) {
            Ok(()) => {
                metrics::record_route("local");
                report.delivered += 1;
            }
            Err(e) => {
                warn!(
                    client_id = %handle.client_id,
                    connection = %handle.id,
                    reason = e.as_str(),
                    "Evicting connection that cannot keep up"
                );
                events::slow_consumer_evicted(&handle.client_id, &handle.id.to_string(), e.as_str());
                metrics::record_route(e.as_str());
                report.dropped += 1;
                self.unregister(&handle.client_id, handle.id);
            }
        }
    }

    /// Queue a narrowed copy for the owning peer. False when `node` is not a
    /// live member.
    fn forward(
        &mut self,
        client_id: &str,
        node: &str,
        message: &RelayMessage,
        report: &mut RouteReport,
    ) -> bool {
        if node == self.node_name {
            return false;
        }
        let Some(target) = self.cluster.member(node) else {
            return false;
        };

        let copy = message.narrowed_for(client_id, &self.node_name);
        let bytes = match PeerEnvelope::Message(copy).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode forwarded message");
                report.dropped += 1;
                return true;
            }
        };

        match self.outbox.submit(OutboundFrame {
            target,
            bytes,
            kind: FrameKind::Message,
        }) {
            Ok(()) => {
                metrics::record_route("forwarded");
                report.forwarded += 1;
            }
            Err(_) => {
                warn!(client_id = %client_id, node = %node, "Outbox full, dropping forward");
                report.dropped += 1;
            }
        }
        true
    }

    fn buffer(&mut self, client_id: &str, message: RelayMessage, report: &mut RouteReport) {
        let outcome = self.pending.push(client_id, message);
        match outcome {
            BufferOutcome::Buffered => report.buffered += 1,
            BufferOutcome::DroppedOldest => {
                report.buffered += 1;
                report.dropped += 1;
            }
            BufferOutcome::DroppedNewest | BufferOutcome::TooManyClients => {
                report.dropped += 1;
            }
        }
        metrics::record_route(outcome.as_str());
        self.update_pending_gauges();
    }

    fn broadcast(&mut self, message: &RelayMessage, from_peer: bool, report: &mut RouteReport) {
        for handle in self.directory.local_handles() {
            self.deliver_local(&handle, message.clone(), report);
        }

        if from_peer {
            return;
        }
        let flooded = message.forwarded_by(&self.node_name);
        match PeerEnvelope::Message(flooded).encode() {
            Ok(bytes) => match self.cluster.queue_broadcast(bytes) {
                Ok(()) => report.forwarded += 1,
                Err(e) => {
                    debug!(error = %e, "Broadcast flood not queued");
                    report.dropped += 1;
                }
            },
            Err(e) => error!(error = %e, "Failed to encode broadcast"),
        }
    }

    fn handle_peer_bytes(&mut self, from: &str, bytes: &[u8]) {
        match PeerEnvelope::decode(bytes, self.config.max_peer_frame_bytes) {
            Ok(PeerEnvelope::Presence(event)) => self.apply_presence(event),
            Ok(PeerEnvelope::Message(mut message)) => {
                if message.orig_node_name.is_none() {
                    message.orig_node_name = Some(from.to_string());
                }
                self.route(message);
            }
            Err(e) => {
                warn!(from = %from, error = %e, "Dropping malformed peer frame");
                metrics::record_peer_frame_dropped("malformed");
            }
        }
    }

    fn apply_presence(&mut self, event: PresenceEvent) {
        if event.node_name == self.node_name {
            return;
        }
        trace!(
            op = ?event.op,
            node = %event.node_name,
            ids = event.client_ids.len(),
            "Applying presence"
        );

        match event.op {
            PresenceOp::Add => {
                for client_id in &event.client_ids {
                    match self
                        .directory
                        .set_remote_unless_local(client_id, &event.node_name)
                    {
                        None => {}
                        Some(previous) => {
                            if let Some(prev) = previous.filter(|p| p != &event.node_name) {
                                events::ownership_moved(client_id, &prev, &event.node_name);
                            }
                            self.flush_pending_to(client_id, &event.node_name);
                        }
                    }
                }
            }
            PresenceOp::Remove => {
                for client_id in &event.client_ids {
                    self.directory.remove_if_remote(client_id);
                }
            }
        }
        metrics::set_remote_clients(self.directory.stats().remote);
    }

    fn flush_pending_to(&mut self, client_id: &str, node: &str) {
        if !self.pending.contains(client_id) {
            return;
        }
        let mut report = RouteReport::default();
        for message in self.pending.take(client_id) {
            if message.is_from_peer() {
                metrics::record_route("stale_owner");
                continue;
            }
            self.forward(client_id, node, &message, &mut report);
        }
        self.update_pending_gauges();
        debug!(
            client_id = %client_id,
            node = %node,
            forwarded = report.forwarded,
            "Flushed pending messages to owner"
        );
    }

    fn update_pending_gauges(&self) {
        metrics::set_pending(self.pending.client_count(), self.pending.message_count());
    }

    fn stats(&self) -> HubStats {
        let directory = self.directory.stats();
        HubStats {
            node_name: self.node_name.clone(),
            local_clients: directory.local,
            remote_clients: directory.remote,
            pending_clients: self.pending.client_count(),
            pending_messages: self.pending.message_count(),
            members: self.cluster.members().len(),
        }
    }
}

impl Message<Register> for Hub {
    type Reply = RegisterAck;

    async fn handle(&mut self, msg: Register, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.register(msg.handle)
    }
}

impl Message<Unregister> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: Unregister,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.unregister(&msg.client_id, msg.connection);
    }
}

impl Message<RouteMessage> for Hub {
    type Reply = RouteReport;

    async fn handle(
        &mut self,
        msg: RouteMessage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let mut message = msg.message;
        // Only peers may set node fields
        message.orig_node_name = None;
        message.hops = 0;
        self.route(message)
    }
}

impl Message<InboundPeerBytes> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: InboundPeerBytes,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.handle_peer_bytes(&msg.from, &msg.bytes);
    }
}

impl Message<MemberJoined> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: MemberJoined,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let queued = self.presence.send_snapshot_to(&msg.member);
        debug!(member = %msg.member.name, queued, "Sent presence snapshot to new member");
    }
}

impl Message<MemberLeft> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: MemberLeft,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let purged = self.directory.purge_node(&msg.name);
        if !purged.is_empty() {
            events::stale_entries_purged(&msg.name, purged.len());
        }
        metrics::set_remote_clients(self.directory.stats().remote);
    }
}

impl Message<ExpirePending> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: ExpirePending,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let expired = self.pending.expire(Instant::now());
        if expired > 0 {
            debug!(expired, "Expired pending messages");
            metrics::record_pending_expired(expired);
            self.update_pending_gauges();
        }
    }
}

impl Message<AntiEntropyTick> for Hub {
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: AntiEntropyTick,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let queued = self.presence.broadcast_snapshot();
        debug!(queued, "Anti-entropy snapshot sent");
    }
}

impl Message<GetHubStats> for Hub {
    type Reply = HubStats;

    async fn handle(
        &mut self,
        _msg: GetHubStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubRuntime;
    use crate::network::membership::{PeerDelivery, PeerInbox};
    use crate::network::memory::MemoryNetwork;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const LIMIT: usize = 1024 * 1024;

    struct Node {
        cluster: Arc<dyn ClusterMembership>,
        runtime: HubRuntime,
    }

    async fn single_node(name: &str) -> Node {
        let net = MemoryNetwork::new();
        let (inbox, rx) = PeerInbox::channel(64);
        let cluster: Arc<dyn ClusterMembership> =
            Arc::new(net.node(name, format!("addr-{name}"), Arc::new(inbox)));
        let runtime = HubRuntime::start(cluster.clone(), rx, HubConfig::default());
        cluster.join(&[format!("addr-{name}")]).await.unwrap();
        Node { cluster, runtime }
    }

    async fn register(node: &Node, id: &str, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<RelayMessage>) {
        let (handle, rx) = ConnectionHandle::channel(id, capacity);
        node.runtime
            .hub()
            .ask(Register {
                handle: handle.clone(),
            })
            .await
            .unwrap();
        (handle, rx)
    }

    async fn route(node: &Node, message: RelayMessage) -> RouteReport {
        node.runtime
            .hub()
            .ask(RouteMessage { message })
            .await
            .unwrap()
    }

    async fn next_message(rx: &mut mpsc::Receiver<PeerDelivery>) -> RelayMessage {
        loop {
            let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for peer frame")
                .expect("peer inbox closed");
            if let PeerEnvelope::Message(message) =
                PeerEnvelope::decode(&delivery.bytes, LIMIT).unwrap()
            {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn test_local_delivery_keeps_submission_order() {
        let node = single_node("a").await;
        let (_handle, mut rx) = register(&node, "c1", 16).await;

        for n in 0..5u8 {
            let report = route(&node, RelayMessage::new(vec!["c1".into()], "c0", vec![n])).await;
            assert_eq!(report.delivered, 1);
        }

        for n in 0..5u8 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.payload, vec![n]);
            assert_eq!(msg.from, "c0");
            assert!(msg.orig_node_name.is_none());
        }
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_recipient_buffered_until_register() {
        let node = single_node("a").await;

        let first = route(&node, RelayMessage::new(vec!["late".into()], "c0", b"1".to_vec())).await;
        let second = route(&node, RelayMessage::new(vec!["late".into()], "c0", b"2".to_vec())).await;
        assert_eq!(first.buffered, 1);
        assert_eq!(second.buffered, 1);

        let stats = node.runtime.hub().ask(GetHubStats).await.unwrap();
        assert_eq!(stats.pending_clients, 1);
        assert_eq!(stats.pending_messages, 2);

        let (handle, mut rx) = ConnectionHandle::channel("late", 16);
        let ack = node.runtime.hub().ask(Register { handle }).await.unwrap();
        assert_eq!(ack.flushed, 2);
        assert!(!ack.replaced);
        assert_eq!(rx.recv().await.unwrap().payload, b"1");
        assert_eq!(rx.recv().await.unwrap().payload, b"2");

        let stats = node.runtime.hub().ask(GetHubStats).await.unwrap();
        assert_eq!(stats.pending_messages, 0);
        assert_eq!(stats.local_clients, 1);
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_evicts_connection() {
        let node = single_node("a").await;
        let (_handle, mut rx) = register(&node, "slow", 1).await;

        let first = route(&node, RelayMessage::new(vec!["slow".into()], "c0", b"1".to_vec())).await;
        let second = route(&node, RelayMessage::new(vec!["slow".into()], "c0", b"2".to_vec())).await;
        assert_eq!(first.delivered, 1);
        assert_eq!(second.dropped, 1);

        assert!(node.runtime.directory().get("slow").is_none());
        assert_eq!(rx.recv().await.unwrap().payload, b"1");
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_unregister_is_ignored() {
        let node = single_node("a").await;
        let (old, _old_rx) = register(&node, "c1", 4).await;
        let (new, _new_rx) = ConnectionHandle::channel("c1", 4);
        let ack = node
            .runtime
            .hub()
            .ask(Register {
                handle: new.clone(),
            })
            .await
            .unwrap();
        assert!(ack.replaced);

        node.runtime
            .hub()
            .ask(Unregister {
                client_id: "c1".into(),
                connection: old.id,
            })
            .await
            .unwrap();
        match node.runtime.directory().get("c1") {
            Some(Location::Local(current)) => assert_eq!(current.id, new.id),
            other => panic!("expected local entry, got {other:?}"),
        }

        node.runtime
            .hub()
            .ask(Unregister {
                client_id: "c1".into(),
                connection: new.id,
            })
            .await
            .unwrap();
        assert!(node.runtime.directory().get("c1").is_none());
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_message_loop_and_hop_guards() {
        let node = single_node("a").await;
        let (_handle, mut rx) = register(&node, "c1", 4).await;

        let mut looped = RelayMessage::new(vec!["c1".into()], "x", b"loop".to_vec());
        looped.orig_node_name = Some("a".into());
        let mut too_far = RelayMessage::new(vec!["c1".into()], "x", b"far".to_vec());
        too_far.orig_node_name = Some("b".into());
        too_far.hops = 2;
        let mut ok = RelayMessage::new(vec!["c1".into()], "x", b"ok".to_vec());
        ok.orig_node_name = Some("b".into());
        ok.hops = 1;

        for message in [looped, too_far, ok] {
            let bytes = PeerEnvelope::Message(message).encode().unwrap();
            node.runtime
                .hub()
                .ask(InboundPeerBytes {
                    from: "b".into(),
                    bytes,
                })
                .await
                .unwrap();
        }

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.payload, b"ok");
        assert!(delivered.orig_node_name.is_none());
        assert_eq!(delivered.hops, 0);
        assert!(rx.try_recv().is_err());
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_peer_frame_is_dropped() {
        let node = single_node("a").await;
        node.runtime
            .hub()
            .ask(InboundPeerBytes {
                from: "b".into(),
                bytes: b"{not json".to_vec(),
            })
            .await
            .unwrap();
        assert!(node.runtime.hub().is_alive());
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_forwarded_copy_is_narrowed_and_stamped() {
        let net = MemoryNetwork::new();
        let (inbox_a, rx_a) = PeerInbox::channel(64);
        let (inbox_b, mut rx_b) = PeerInbox::channel(64);
        let a: Arc<dyn ClusterMembership> = Arc::new(net.node("a", "addr-a", Arc::new(inbox_a)));
        let b = net.node("b", "addr-b", Arc::new(inbox_b));
        let runtime = HubRuntime::start(a.clone(), rx_a, HubConfig::default());
        a.join(&["addr-a".to_string()]).await.unwrap();
        b.join(&["addr-a".to_string()]).await.unwrap();
        let node = Node { cluster: a, runtime };

        let (_handle, mut local_rx) = register(&node, "here", 4).await;
        node.runtime
            .directory()
            .set("there", Location::Remote("b".into()));

        let message = RelayMessage::new(vec!["there".into(), "here".into()], "c0", b"hi".to_vec())
            .with_id("m-1");
        let report = route(&node, message).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.forwarded, 1);

        let copy = next_message(&mut rx_b).await;
        assert_eq!(copy.to, vec!["there".to_string()]);
        assert_eq!(copy.orig_node_name.as_deref(), Some("a"));
        assert_eq!(copy.hops, 1);
        assert_eq!(copy.id.as_deref(), Some("m-1"));
        assert_eq!(copy.payload, b"hi");

        let local = local_rx.recv().await.unwrap();
        assert_eq!(local.to, vec!["there".to_string(), "here".to_string()]);
        assert_eq!(node.cluster.local_name(), "a");
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_anti_entropy_tick_follows_queued_unregister() {
        let net = MemoryNetwork::new();
        let (inbox_a, rx_a) = PeerInbox::channel(64);
        let (inbox_b, mut rx_b) = PeerInbox::channel(64);
        let a: Arc<dyn ClusterMembership> = Arc::new(net.node("a", "addr-a", Arc::new(inbox_a)));
        let b = net.node("b", "addr-b", Arc::new(inbox_b));
        let runtime = HubRuntime::start(a.clone(), rx_a, HubConfig::default());
        a.join(&["addr-a".to_string()]).await.unwrap();
        b.join(&["addr-a".to_string()]).await.unwrap();
        let node = Node { cluster: a, runtime };

        let (handle, _rx) = register(&node, "c1", 4).await;
        let hub = node.runtime.hub();
        hub.tell(Unregister {
            client_id: "c1".into(),
            connection: handle.id,
        })
        .await
        .unwrap();
        hub.ask(AntiEntropyTick).await.unwrap();
        hub.ask(GetHubStats).await.unwrap();

        let mut ops = Vec::new();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(200), rx_b.recv()).await
        {
            if let PeerEnvelope::Presence(event) =
                PeerEnvelope::decode(&delivery.bytes, LIMIT).unwrap()
            {
                if event.client_ids.iter().any(|id| id == "c1") {
                    ops.push(event.op);
                }
            }
        }
        assert_eq!(ops, vec![PresenceOp::Add, PresenceOp::Remove]);
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_frame_larger_than_client_limit_is_delivered() {
        let node = single_node("a").await;
        let (_handle, mut rx) = register(&node, "c1", 4).await;

        let payload = vec![7u8; 900 * 1024];
        let mut message = RelayMessage::new(vec!["c1".into()], "x", payload.clone());
        message.orig_node_name = Some("b".into());
        message.hops = 1;
        let bytes = PeerEnvelope::Message(message).encode().unwrap();
        assert!(bytes.len() > node.runtime.config().max_message_bytes);

        node.runtime
            .hub()
            .ask(InboundPeerBytes {
                from: "b".into(),
                bytes,
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().payload, payload);
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_message_for_remote_client_is_not_forwarded() {
        let node = single_node("a").await;
        node.runtime
            .directory()
            .set("elsewhere", Location::Remote("c".into()));

        let mut message = RelayMessage::new(vec!["elsewhere".into()], "x", b"hi".to_vec());
        message.orig_node_name = Some("b".into());
        message.hops = 1;
        let bytes = PeerEnvelope::Message(message).encode().unwrap();
        node.runtime
            .hub()
            .ask(InboundPeerBytes {
                from: "b".into(),
                bytes,
            })
            .await
            .unwrap();

        let stats = node.runtime.hub().ask(GetHubStats).await.unwrap();
        assert_eq!(stats.pending_messages, 0);
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_presence_add_never_overrides_local() {
        let node = single_node("a").await;
        let (_handle, _rx) = register(&node, "c1", 4).await;

        for event in [
            PresenceEvent::add("b", "c1"),
            PresenceEvent::add("b", "c2"),
            PresenceEvent::remove("b", "c1"),
        ] {
            let bytes = PeerEnvelope::Presence(event).encode().unwrap();
            node.runtime
                .hub()
                .ask(InboundPeerBytes {
                    from: "b".into(),
                    bytes,
                })
                .await
                .unwrap();
        }

        assert!(matches!(
            node.runtime.directory().get("c1"),
            Some(Location::Local(_))
        ));
        assert!(matches!(
            node.runtime.directory().get("c2"),
            Some(Location::Remote(owner)) if owner == "b"
        ));
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_member_left_purges_remote_entries() {
        let node = single_node("a").await;
        node.runtime.directory().set("r1", Location::Remote("b".into()));
        node.runtime.directory().set("r2", Location::Remote("c".into()));

        node.runtime
            .hub()
            .ask(MemberLeft { name: "b".into() })
            .await
            .unwrap();

        assert!(node.runtime.directory().get("r1").is_none());
        assert!(node.runtime.directory().get("r2").is_some());
        node.runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_local_client() {
        let node = single_node("a").await;
        let (_h1, mut rx1) = register(&node, "c1", 4).await;
        let (_h2, mut rx2) = register(&node, "c2", 4).await;

        let report = route(&node, RelayMessage::new(Vec::new(), "c1", b"all".to_vec())).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(rx1.recv().await.unwrap().payload, b"all");
        assert_eq!(rx2.recv().await.unwrap().payload, b"all");
        node.runtime.shutdown().await;
    }
}
