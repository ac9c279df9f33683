//! libp2p NetworkBehaviour Configuration
//!
//! Combines the protocols a relay node speaks to its peers:
//! - Request-response: reliable point-to-point delivery of hub frames
//! - Gossipsub: best-effort flooding of broadcast messages
//! - Identify: protocol version exchange, gates cluster membership
//! - Ping: connection liveness

use super::config::NetworkConfig;
use crate::version::PROTOCOL_VERSION;
use libp2p::{
    gossipsub, identify, identity, ping,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
    StreamProtocol,
};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Stream protocol for reliable hub frames.
pub const RELAY_PROTOCOL: StreamProtocol = StreamProtocol::new("/relaymesh/relay/1");

/// One hub frame sent to a single peer.
///
/// Hub frames are already JSON, so the frame embeds them verbatim instead of
/// re-encoding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayFrame(Box<RawValue>);

impl RelayFrame {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes).map(Self)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        Box::<str>::from(self.0).into_string().into_bytes()
    }
}

/// Receipt for a [`RelayFrame`]; only its arrival matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayAck {
    pub accepted: bool,
}

#[derive(Debug, Error)]
pub enum BehaviourError {
    #[error("gossipsub configuration: {0}")]
    Gossip(String),

    #[error("gossipsub subscription: {0}")]
    Subscription(#[from] gossipsub::SubscriptionError),
}

/// Topic every node of a cluster subscribes to for broadcasts.
pub fn broadcast_topic(cluster_id: &str) -> gossipsub::IdentTopic {
    gossipsub::IdentTopic::new(format!("relaymesh/{cluster_id}/broadcast"))
}

/// Combined network behaviour for peer communication.
#[derive(NetworkBehaviour)]
pub struct RelayBehaviour {
    pub relay: request_response::json::Behaviour<RelayFrame, RelayAck>,
    pub gossip: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

impl RelayBehaviour {
    pub fn new(key: &identity::Keypair, config: &NetworkConfig) -> Result<Self, BehaviourError> {
        // The json codec caps requests at 1 MiB unless told otherwise
        let codec = request_response::json::codec::Codec::default()
            .set_request_size_maximum(config.max_frame_bytes as u64);
        let relay = request_response::json::Behaviour::with_codec(
            codec,
            [(RELAY_PROTOCOL, ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(config.request_timeout),
        );

        let gossip_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(config.gossip_heartbeat)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .max_transmit_size(config.max_frame_bytes)
            .build()
            .map_err(|e| BehaviourError::Gossip(e.to_string()))?;
        let mut gossip = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(key.clone()),
            gossip_config,
        )
        .map_err(|e| BehaviourError::Gossip(e.to_string()))?;
        gossip.subscribe(&broadcast_topic(&config.cluster_id))?;

        let identify = identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            key.public(),
        ));

        let ping = ping::Behaviour::new(ping::Config::new().with_interval(config.ping_interval));

        Ok(Self {
            relay,
            gossip,
            identify,
            ping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaymesh_core::{Message, PeerEnvelope};

    #[test]
    fn test_behaviour_builds_with_defaults() {
        let key = identity::Keypair::generate_ed25519();
        assert!(RelayBehaviour::new(&key, &NetworkConfig::default()).is_ok());
    }

    #[test]
    fn test_frame_embeds_envelope_json_verbatim() {
        let envelope = PeerEnvelope::Message(Message::new(vec!["c1".into()], "c0", vec![1u8; 64]))
            .encode()
            .unwrap();
        let frame = RelayFrame::from_bytes(&envelope).unwrap();

        let wire = serde_json::to_vec(&frame).unwrap();
        assert_eq!(wire, envelope);

        let back: RelayFrame = serde_json::from_slice(&wire).unwrap();
        assert_eq!(back.into_bytes(), envelope);
    }

    #[test]
    fn test_frame_rejects_non_json() {
        assert!(RelayFrame::from_bytes(b"not json").is_err());
        assert!(RelayFrame::from_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_topic_is_scoped_by_cluster() {
        assert_ne!(
            broadcast_topic("a").hash(),
            broadcast_topic("b").hash()
        );
    }
}
