//! Swarm Builder
//!
//! Creates the libp2p swarm: TCP transport with DNS resolution, noise
//! encryption and yamux multiplexing.

use super::super::behaviour::RelayBehaviour;
use super::super::config::NetworkConfig;
use anyhow::Result;
use libp2p::{identity, noise, swarm::Swarm, tcp, yamux};
use tracing::debug;

/// Creates and configures a libp2p swarm listening on the P2P port.
pub fn build_swarm(config: &NetworkConfig, keypair: identity::Keypair) -> Result<Swarm<RelayBehaviour>> {
    let config_for_behaviour = config.clone();
    let idle_timeout = config.connection_idle_timeout;

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_dns()?
        .with_behaviour(
            move |key| -> Result<RelayBehaviour, Box<dyn std::error::Error + Send + Sync>> {
                debug!(
                    peer_id = %key.public().to_peer_id(),
                    "Created swarm identity"
                );
                Ok(RelayBehaviour::new(key, &config_for_behaviour)?)
            },
        )?
        .with_swarm_config(move |c| c.with_idle_connection_timeout(idle_timeout))
        .build();

    swarm.listen_on(config.listen_multiaddr().parse()?)?;
    debug!(port = config.p2p_port, "Configured P2P listen address");

    if let Ok(external) = config.advertised_multiaddr().parse() {
        swarm.add_external_address(external);
    }

    Ok(swarm)
}
