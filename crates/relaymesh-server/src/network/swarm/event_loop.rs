//! Swarm Event Loop
//!
//! A single task owns the swarm. It turns identify results and connection
//! closures into membership events, hands inbound frames to the delegate and
//! executes send/dial/broadcast commands issued by the membership handle.

use super::super::behaviour::{RelayAck, RelayBehaviour, RelayBehaviourEvent, RelayFrame};
use super::super::membership::{ClusterError, Delegate, MembershipEvent};
use super::super::types::{short_id, MemberTable};
use crate::observability::{events, metrics};
use crate::version::PROTOCOL_VERSION;
use futures::StreamExt;
use libp2p::{
    gossipsub, identify, ping,
    request_response::{self, OutboundRequestId},
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

type SendReply = oneshot::Sender<Result<(), ClusterError>>;

/// Commands accepted by the event loop
#[derive(Debug)]
pub enum SwarmCommand {
    Dial { addr: Multiaddr },
    Send {
        peer: PeerId,
        frame: RelayFrame,
        reply: SendReply,
    },
    Broadcast { bytes: Vec<u8> },
    Shutdown,
}

pub struct SwarmEventLoop {
    swarm: Swarm<RelayBehaviour>,
    commands: mpsc::Receiver<SwarmCommand>,
    table: Arc<MemberTable>,
    delegate: Arc<dyn Delegate>,
    membership_tx: broadcast::Sender<MembershipEvent>,
    topic: gossipsub::IdentTopic,
    cluster_id: String,
    max_failures: u32,
    pending_sends: HashMap<OutboundRequestId, (PeerId, SendReply)>,
}

impl SwarmEventLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swarm: Swarm<RelayBehaviour>,
        commands: mpsc::Receiver<SwarmCommand>,
        table: Arc<MemberTable>,
        delegate: Arc<dyn Delegate>,
        membership_tx: broadcast::Sender<MembershipEvent>,
        topic: gossipsub::IdentTopic,
        cluster_id: String,
        max_failures: u32,
    ) -> Self {
        Self {
            swarm,
            commands,
            table,
            delegate,
            membership_tx,
            topic,
            cluster_id,
            max_failures,
            pending_sends: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }

                cmd = self.commands.recv() => match cmd {
                    Some(SwarmCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
            }
        }

        for (_, (_, reply)) in self.pending_sends.drain() {
            let _ = reply.send(Err(ClusterError::Closed));
        }
        info!("Swarm event loop stopped");
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<RelayBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(address = %address, "P2P network listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(
                    peer_id_short = short_id(&peer_id),
                    remote_addr = %endpoint.get_remote_address(),
                    "Peer connected"
                );
                self.table.mark_connected(peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(
                    peer_id_short = short_id(&peer_id),
                    remaining = num_established,
                    cause = ?cause,
                    "Peer connection closed"
                );
                if num_established == 0 {
                    if let Some(name) = self.table.remove(&peer_id) {
                        events::peer_departed(&name, &self.cluster_id);
                        metrics::set_peer_count(self.table.peer_count());
                        let _ = self.membership_tx.send(MembershipEvent::Left(name));
                    }
                }
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => self.handle_identify(peer_id, info),
            SwarmEvent::Behaviour(RelayBehaviourEvent::Identify(identify::Event::Error {
                peer_id,
                error,
                ..
            })) => {
                trace!(
                    peer_id_short = short_id(&peer_id),
                    error = %error,
                    "Identify: protocol error"
                );
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Identify(_)) => {}
            SwarmEvent::Behaviour(RelayBehaviourEvent::Relay(event)) => {
                self.handle_relay_event(event);
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Gossip(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let source = message.source.unwrap_or(propagation_source);
                trace!(
                    peer_id_short = short_id(&source),
                    bytes = message.data.len(),
                    "Gossip: broadcast received"
                );
                self.delegate.notify_message(&source.to_base58(), message.data);
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Gossip(event)) => {
                trace!(event = ?event, "Gossip: event");
            }
            SwarmEvent::Behaviour(RelayBehaviourEvent::Ping(ping::Event { peer, result, .. })) => {
                match result {
                    Ok(rtt) => metrics::record_ping_duration(&short_id(&peer), rtt),
                    Err(e) => debug!(
                        peer_id_short = short_id(&peer),
                        error = %e,
                        "Ping failed"
                    ),
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(
                    peer_id_short = ?peer_id.as_ref().map(short_id),
                    error = %error,
                    "Outgoing connection failed"
                );
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                trace!(error = %error, "Incoming connection failed");
            }
            _ => {}
        }
    }

    fn handle_identify(&mut self, peer_id: PeerId, info: identify::Info) {
        if info.protocol_version != PROTOCOL_VERSION {
            warn!(
                peer_id_short = short_id(&peer_id),
                theirs = %info.protocol_version,
                ours = PROTOCOL_VERSION,
                "Protocol mismatch, disconnecting peer"
            );
            let _ = self.swarm.disconnect_peer_id(peer_id);
            return;
        }

        let address = info
            .listen_addrs
            .iter()
            .find(|a| !is_local_only(a))
            .or_else(|| info.listen_addrs.first())
            .cloned();
        if let Some(member) = self.table.admit(peer_id, address) {
            events::peer_joined(&member.name, &member.address, &self.cluster_id);
            metrics::set_peer_count(self.table.peer_count());
            let _ = self.membership_tx.send(MembershipEvent::Joined(member));
        }
    }

    fn handle_relay_event(&mut self, event: request_response::Event<RelayFrame, RelayAck>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    self.delegate.notify_message(&peer.to_base58(), request.into_bytes());
                    if self
                        .swarm
                        .behaviour_mut()
                        .relay
                        .send_response(channel, RelayAck { accepted: true })
                        .is_err()
                    {
                        trace!(peer_id_short = short_id(&peer), "Relay: ack not delivered");
                    }
                }
                request_response::Message::Response { request_id, .. } => {
                    self.table.mark_success(&peer);
                    if let Some((_, reply)) = self.pending_sends.remove(&request_id) {
                        let _ = reply.send(Ok(()));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!(
                    peer_id_short = short_id(&peer),
                    error = %error,
                    "Relay: send failed"
                );
                let err = match error {
                    request_response::OutboundFailure::Timeout => ClusterError::Timeout,
                    other => ClusterError::Transport(other.to_string()),
                };
                if let Some((_, reply)) = self.pending_sends.remove(&request_id) {
                    let _ = reply.send(Err(err));
                }
                if self.table.mark_failure(&peer, self.max_failures) {
                    warn!(
                        peer_id_short = short_id(&peer),
                        "Too many send failures, disconnecting peer"
                    );
                    let _ = self.swarm.disconnect_peer_id(peer);
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                trace!(
                    peer_id_short = short_id(&peer),
                    error = %error,
                    "Relay: inbound failure"
                );
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn handle_command(&mut self, cmd: SwarmCommand) {
        match cmd {
            SwarmCommand::Dial { addr } => {
                if let Err(e) = self.swarm.dial(addr.clone()) {
                    debug!(addr = %addr, error = %e, "Dial failed");
                }
            }
            SwarmCommand::Send { peer, frame, reply } => {
                let request_id = self.swarm.behaviour_mut().relay.send_request(&peer, frame);
                self.pending_sends.insert(request_id, (peer, reply));
            }
            SwarmCommand::Broadcast { bytes } => {
                if let Err(e) = self
                    .swarm
                    .behaviour_mut()
                    .gossip
                    .publish(self.topic.clone(), bytes)
                {
                    debug!(error = %e, "Gossip: publish skipped");
                }
            }
            SwarmCommand::Shutdown => {}
        }
    }
}

fn is_local_only(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| match p {
        libp2p::multiaddr::Protocol::Ip4(ip) => ip.is_unspecified() || ip.is_loopback(),
        libp2p::multiaddr::Protocol::Ip6(ip) => ip.is_unspecified() || ip.is_loopback(),
        _ => false,
    })
}

/// Spawns the swarm event loop
pub fn spawn_event_loop(event_loop: SwarmEventLoop) -> tokio::task::JoinHandle<()> {
    tokio::spawn(event_loop.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_only_addresses() {
        assert!(is_local_only(&"/ip4/0.0.0.0/tcp/8081".parse().unwrap()));
        assert!(is_local_only(&"/ip4/127.0.0.1/tcp/8081".parse().unwrap()));
        assert!(!is_local_only(&"/ip4/10.1.2.3/tcp/8081".parse().unwrap()));
    }
}
