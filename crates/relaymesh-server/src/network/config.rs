//! Network Configuration
//!
//! Settings for the inter-node transport, cluster membership and seed
//! discovery, with environment variable overrides.

use std::time::Duration;

/// Network configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    // Transport
    /// P2P listen port (env: P2P_PORT)
    pub p2p_port: u16,

    /// Address other nodes use to reach this one (env: POD_IP)
    pub advertise_ip: String,

    /// Idle connection timeout before closing
    pub connection_idle_timeout: Duration,

    /// Timeout for a single reliable peer send
    pub request_timeout: Duration,

    /// Largest peer frame accepted, in bytes
    pub max_frame_bytes: usize,

    // Cluster
    /// Cluster identifier, also names the broadcast topic (env: CLUSTER_ID)
    pub cluster_id: String,

    /// How long `join` waits for the first seed to become a member
    pub join_timeout: Duration,

    /// Interval between seed re-resolution and redial
    pub rejoin_interval: Duration,

    /// Liveness ping interval
    pub ping_interval: Duration,

    /// Gossipsub heartbeat interval
    pub gossip_heartbeat: Duration,

    /// Consecutive send failures before a member is disconnected
    pub max_failures: u32,

    // Seed resolution
    /// Seeds wanted before joining without a warning
    pub seed_quorum: usize,

    /// Resolution attempts before giving up
    pub seed_attempts: u32,

    /// Delay between resolution attempts
    pub seed_retry_delay: Duration,

    // Etcd registry
    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// TTL for the registration lease (seconds)
    pub lease_ttl: i64,

    /// Interval for lease keep-alive (1/3 of TTL recommended)
    pub keepalive_interval: Duration,

    pub etcd_backoff_initial: Duration,
    pub etcd_backoff_max: Duration,
    pub etcd_backoff_max_elapsed: Duration,
    pub etcd_backoff_multiplier: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            p2p_port: 8081,
            advertise_ip: "127.0.0.1".to_string(),
            connection_idle_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
            max_frame_bytes: 4 * 1024 * 1024,

            cluster_id: "default".to_string(),
            join_timeout: Duration::from_secs(10),
            rejoin_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            gossip_heartbeat: Duration::from_secs(1),
            max_failures: 5,

            seed_quorum: 3,
            seed_attempts: 10,
            seed_retry_delay: Duration::from_secs(10),

            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            lease_ttl: 15,
            keepalive_interval: Duration::from_secs(5),
            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
        }
    }
}

impl NetworkConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("P2P_PORT") {
            config.p2p_port = port;
        }

        if let Ok(pod_ip) = std::env::var("POD_IP") {
            config.advertise_ip = pod_ip;
        }

        if let Ok(cluster_id) = std::env::var("CLUSTER_ID") {
            config.cluster_id = cluster_id;
        }

        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints.split(',').map(String::from).collect();
        }

        if let Some(quorum) = env_parse::<usize>("SEED_QUORUM") {
            config.seed_quorum = quorum;
        }

        if let Some(attempts) = env_parse::<u32>("SEED_ATTEMPTS") {
            config.seed_attempts = attempts;
        }

        if let Some(secs) = env_parse::<u64>("SEED_RETRY_DELAY_SECS") {
            config.seed_retry_delay = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("REJOIN_INTERVAL_SECS") {
            config.rejoin_interval = Duration::from_secs(secs);
        }

        config
    }

    /// Multiaddr this node listens on for peer traffic.
    pub fn listen_multiaddr(&self) -> String {
        format!("/ip4/0.0.0.0/tcp/{}", self.p2p_port)
    }

    /// Multiaddr peers are told to dial.
    pub fn advertised_multiaddr(&self) -> String {
        format!("/ip4/{}/tcp/{}", self.advertise_ip, self.p2p_port)
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_seed_policy() {
        let config = NetworkConfig::default();
        assert_eq!(config.seed_quorum, 3);
        assert_eq!(config.seed_attempts, 10);
        assert_eq!(config.seed_retry_delay, Duration::from_secs(10));
        assert_eq!(config.p2p_port, 8081);
    }

    #[test]
    fn test_multiaddrs() {
        let config = NetworkConfig {
            advertise_ip: "10.0.0.7".to_string(),
            p2p_port: 9100,
            ..Default::default()
        };
        assert_eq!(config.listen_multiaddr(), "/ip4/0.0.0.0/tcp/9100");
        assert_eq!(config.advertised_multiaddr(), "/ip4/10.0.0.7/tcp/9100");
    }
}
