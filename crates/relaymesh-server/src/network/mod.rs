//! Cluster Networking
//!
//! Membership, peer transport and seed discovery for the relay hub.
//!
//! This module contains:
//! - `membership`: The contract the hub consumes (join, members, reliable send, broadcast)
//! - `cluster`: libp2p-backed membership
//! - `memory`: In-process membership for standalone runs and tests
//! - `behaviour` / `swarm`: libp2p behaviour, swarm construction and event loop
//! - `types`: Per-peer connection state and the member table
//! - `discovery`: Seed sources and the seed quorum loop
//! - `config`: Network settings

pub mod behaviour;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod membership;
pub mod memory;
pub mod swarm;
pub mod types;

pub use cluster::{parse_seed, Libp2pCluster};
pub use config::NetworkConfig;
pub use membership::{
    ClusterError, ClusterMember, ClusterMembership, Delegate, MembershipEvent, PeerDelivery,
    PeerInbox,
};
pub use memory::{MemoryCluster, MemoryNetwork};
