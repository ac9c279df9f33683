//! libp2p Cluster Membership
//!
//! [`ClusterMembership`] over a libp2p swarm. Members are peers that
//! completed identify with our protocol version; a member's name is its
//! base58 peer id. The swarm itself lives in the event loop task and is
//! driven through [`SwarmCommand`]s.

use super::behaviour::{broadcast_topic, RelayFrame};
use super::config::NetworkConfig;
use super::membership::{ClusterError, ClusterMember, ClusterMembership, Delegate, MembershipEvent};
use super::swarm::{build_swarm, spawn_event_loop, SwarmCommand, SwarmEventLoop};
use super::types::MemberTable;
use async_trait::async_trait;
use libp2p::{identity, multiaddr::Protocol, Multiaddr, PeerId};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 1024;
const EVENT_CAPACITY: usize = 256;

pub struct Libp2pCluster {
    local_peer_id: PeerId,
    table: Arc<MemberTable>,
    commands: mpsc::Sender<SwarmCommand>,
    membership_tx: broadcast::Sender<MembershipEvent>,
    config: NetworkConfig,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Libp2pCluster {
    /// Build the swarm, start listening and spawn its event loop.
    pub fn start(config: NetworkConfig, delegate: Arc<dyn Delegate>) -> anyhow::Result<Self> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = keypair.public().to_peer_id();
        let swarm = build_swarm(&config, keypair)?;

        let table = Arc::new(MemberTable::new(ClusterMember {
            name: local_peer_id.to_base58(),
            address: config.advertised_multiaddr(),
        }));
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (membership_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let event_loop = SwarmEventLoop::new(
            swarm,
            command_rx,
            table.clone(),
            delegate,
            membership_tx.clone(),
            broadcast_topic(&config.cluster_id),
            config.cluster_id.clone(),
            config.max_failures,
        );
        let handle = spawn_event_loop(event_loop);

        info!(
            peer_id = %local_peer_id,
            advertised = %config.advertised_multiaddr(),
            cluster_id = %config.cluster_id,
            "P2P membership started"
        );

        Ok(Self {
            local_peer_id,
            table,
            commands,
            membership_tx,
            config,
            event_loop: Mutex::new(Some(handle)),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn is_self(&self, addr: &Multiaddr) -> bool {
        let mut ip = None;
        let mut port = None;
        for proto in addr.iter() {
            match proto {
                Protocol::Ip4(v4) => ip = Some(IpAddr::V4(v4)),
                Protocol::Ip6(v6) => ip = Some(IpAddr::V6(v6)),
                Protocol::Tcp(p) => port = Some(p),
                Protocol::P2p(peer) if peer == self.local_peer_id => return true,
                _ => {}
            }
        }
        port == Some(self.config.p2p_port)
            && ip.is_some_and(|ip| ip.to_string() == self.config.advertise_ip)
    }
}

/// Turn a seed string into a dialable address.
///
/// Accepts a multiaddr (`/ip4/10.0.0.1/tcp/8081`), `ip:port`, a bare ip, or
/// `host[:port]`; missing ports default to `default_port`.
pub fn parse_seed(seed: &str, default_port: u16) -> Result<Multiaddr, ClusterError> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(ClusterError::InvalidSeed(seed.to_string()));
    }
    if seed.starts_with('/') {
        return seed
            .parse()
            .map_err(|_| ClusterError::InvalidSeed(seed.to_string()));
    }

    let (host, port) = if let Ok(sock) = seed.parse::<SocketAddr>() {
        (sock.ip().to_string(), sock.port())
    } else if let Ok(ip) = seed.parse::<IpAddr>() {
        (ip.to_string(), default_port)
    } else {
        match seed.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                port.parse()
                    .map_err(|_| ClusterError::InvalidSeed(seed.to_string()))?,
            ),
            None => (seed.to_string(), default_port),
        }
    };

    let addr = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Multiaddr::empty().with(Protocol::Ip4(ip)),
        Ok(IpAddr::V6(ip)) => Multiaddr::empty().with(Protocol::Ip6(ip)),
        Err(_) => Multiaddr::empty().with(Protocol::Dns4(host.into())),
    };
    Ok(addr.with(Protocol::Tcp(port)))
}

#[async_trait]
impl ClusterMembership for Libp2pCluster {
    fn local_name(&self) -> &str {
        &self.table.local().name
    }

    async fn join(&self, seeds: &[String]) -> Result<usize, ClusterError> {
        if seeds.is_empty() {
            return Err(ClusterError::NoSeeds);
        }

        let mut joined_rx = self.membership_tx.subscribe();
        let mut self_seeds = 0;
        let mut dialed = 0;
        for seed in seeds {
            let addr = match parse_seed(seed, self.config.p2p_port) {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Skipping seed");
                    continue;
                }
            };
            if self.is_self(&addr) {
                self_seeds += 1;
                continue;
            }
            debug!(addr = %addr, "Dialing seed");
            self.commands
                .send(SwarmCommand::Dial { addr })
                .await
                .map_err(|_| ClusterError::Closed)?;
            dialed += 1;
        }

        if dialed > 0 && self.table.peer_count() == 0 {
            let wait = async {
                loop {
                    match joined_rx.recv().await {
                        Ok(MembershipEvent::Joined(_)) => return true,
                        Ok(MembershipEvent::Left(_)) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return false,
                    }
                }
            };
            let _ = tokio::time::timeout(self.config.join_timeout, wait).await;
        }

        let responded = self_seeds + self.table.peer_count().min(dialed);
        if responded == 0 {
            return Err(ClusterError::JoinFailed {
                attempted: seeds.len(),
            });
        }
        Ok(responded)
    }

    fn members(&self) -> Vec<ClusterMember> {
        self.table.members()
    }

    fn is_member(&self, name: &str) -> bool {
        if name == self.local_name() {
            return true;
        }
        name.parse::<PeerId>()
            .map(|peer| self.table.is_member(&peer))
            .unwrap_or(false)
    }

    async fn send_reliable(&self, member: &ClusterMember, bytes: Vec<u8>) -> Result<(), ClusterError> {
        let peer: PeerId = member
            .name
            .parse()
            .map_err(|_| ClusterError::UnknownMember(member.name.clone()))?;
        if !self.table.is_member(&peer) {
            return Err(ClusterError::UnknownMember(member.name.clone()));
        }

        let frame = RelayFrame::from_bytes(&bytes)?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SwarmCommand::Send {
                peer,
                frame,
                reply,
            })
            .await
            .map_err(|_| ClusterError::Closed)?;

        // The request-response timeout fires first; this only guards a stalled loop
        match tokio::time::timeout(self.config.request_timeout * 2, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClusterError::Closed),
            Err(_) => Err(ClusterError::Timeout),
        }
    }

    fn queue_broadcast(&self, bytes: Vec<u8>) -> Result<(), ClusterError> {
        self.commands
            .try_send(SwarmCommand::Broadcast { bytes })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ClusterError::Transport("swarm command queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => ClusterError::Closed,
            })
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.membership_tx.subscribe()
    }

    async fn leave(&self) -> Result<(), ClusterError> {
        let _ = self.commands.send(SwarmCommand::Shutdown).await;
        let handle = self
            .event_loop
            .lock()
            .map_err(|_| ClusterError::Closed)?
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Swarm event loop ended abnormally");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::membership::PeerInbox;
    use relaymesh_core::{Message, PeerEnvelope};

    #[test]
    fn test_parse_seed_forms() {
        assert_eq!(
            parse_seed("10.0.0.1:9000", 8081).unwrap().to_string(),
            "/ip4/10.0.0.1/tcp/9000"
        );
        assert_eq!(
            parse_seed("10.0.0.1", 8081).unwrap().to_string(),
            "/ip4/10.0.0.1/tcp/8081"
        );
        assert_eq!(
            parse_seed("relay-0.relay.default.svc", 8081).unwrap().to_string(),
            "/dns4/relay-0.relay.default.svc/tcp/8081"
        );
        assert_eq!(
            parse_seed("/ip4/10.0.0.2/tcp/8081", 1).unwrap().to_string(),
            "/ip4/10.0.0.2/tcp/8081"
        );
        assert!(parse_seed("", 8081).is_err());
        assert!(parse_seed("host:notaport", 8081).is_err());
    }

    #[tokio::test]
    async fn test_lone_node_joins_through_own_address() {
        let config = NetworkConfig {
            p2p_port: 0,
            advertise_ip: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let (inbox, _rx) = PeerInbox::channel(8);
        let cluster = Libp2pCluster::start(config, Arc::new(inbox)).unwrap();

        assert!(matches!(cluster.join(&[]).await, Err(ClusterError::NoSeeds)));
        assert_eq!(cluster.join(&["127.0.0.1:0".to_string()]).await.unwrap(), 1);
        assert_eq!(cluster.members().len(), 1);
        assert!(cluster.is_member(cluster.local_name()));

        cluster.leave().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_frame_reaches_peer_intact() {
        let node = |port| NetworkConfig {
            p2p_port: port,
            advertise_ip: "127.0.0.1".to_string(),
            ..Default::default()
        };
        let (inbox_a, mut rx_a) = PeerInbox::channel(8);
        let (inbox_b, _rx_b) = PeerInbox::channel(8);
        let a = Libp2pCluster::start(node(48301), Arc::new(inbox_a)).unwrap();
        let b = Libp2pCluster::start(node(48302), Arc::new(inbox_b)).unwrap();

        assert_eq!(b.join(&["127.0.0.1:48301".to_string()]).await.unwrap(), 1);
        let peer_a = b
            .peers()
            .into_iter()
            .find(|m| m.name == a.local_name())
            .expect("a is a member of b's view");

        // Over 1 MiB once base64 encoded
        let payload = vec![42u8; 700 * 1024];
        let envelope = PeerEnvelope::Message(Message::new(vec!["c1".into()], "c0", payload.clone()))
            .encode()
            .unwrap();
        b.send_reliable(&peer_a, envelope).await.unwrap();

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(5), rx_a.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("inbox closed");
        assert_eq!(delivery.from, b.local_name());
        match PeerEnvelope::decode(&delivery.bytes, 4 * 1024 * 1024).unwrap() {
            PeerEnvelope::Message(message) => assert_eq!(message.payload, payload),
            other => panic!("unexpected envelope: {other:?}"),
        }

        b.leave().await.unwrap();
        a.leave().await.unwrap();
    }
}
