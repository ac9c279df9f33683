//! Hub Configuration
//!
//! Queue bounds, buffer limits and timers for the routing core and the
//! WebSocket adapter, with environment variable overrides.

use crate::network::config::env_parse;
use std::time::Duration;
use strum::{Display, EnumString};

/// What to drop when a client's pending queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room
    #[default]
    DropOldest,
    /// Reject the incoming message
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    // Connections
    /// Outbound queue capacity per client connection
    pub outbound_queue_capacity: usize,

    /// Largest client frame accepted, in bytes
    pub max_message_bytes: usize,

    /// Largest peer frame decoded, in bytes. Peer frames carry a base64
    /// payload plus routing fields, so this sits above `max_message_bytes`.
    pub max_peer_frame_bytes: usize,

    /// Interval between server pings
    pub ws_ping_interval: Duration,

    /// Connection is dropped when nothing is read for this long
    pub ws_pong_wait: Duration,

    /// Deadline for a single socket write
    pub ws_write_timeout: Duration,

    // Pending buffer
    pub pending_per_client: usize,
    pub pending_max_clients: usize,
    pub pending_ttl: Duration,
    pub overflow_policy: OverflowPolicy,
    pub pending_sweep_interval: Duration,

    // Presence
    pub anti_entropy_interval: Duration,

    /// Client ids per anti-entropy presence event
    pub snapshot_chunk: usize,

    // Forwarding
    /// Peer messages with more hops than this are dropped
    pub max_hops: u8,

    /// Frames waiting for a peer-send worker, per worker
    pub outbox_capacity: usize,

    pub outbox_workers: usize,

    /// Peer frames waiting to enter the hub
    pub inbound_peer_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            max_message_bytes: 1024 * 1024,
            max_peer_frame_bytes: 4 * 1024 * 1024,
            ws_ping_interval: Duration::from_secs(54),
            ws_pong_wait: Duration::from_secs(60),
            ws_write_timeout: Duration::from_secs(10),

            pending_per_client: 64,
            pending_max_clients: 10_000,
            pending_ttl: Duration::from_secs(300),
            overflow_policy: OverflowPolicy::DropOldest,
            pending_sweep_interval: Duration::from_secs(30),

            anti_entropy_interval: Duration::from_secs(60),
            snapshot_chunk: 1024,

            max_hops: 1,
            outbox_capacity: 1024,
            outbox_workers: 4,
            inbound_peer_capacity: 4096,
        }
    }
}

impl HubConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(capacity) = env_parse::<usize>("OUTBOUND_QUEUE_CAPACITY") {
            config.outbound_queue_capacity = capacity;
        }

        if let Some(per_client) = env_parse::<usize>("PENDING_PER_CLIENT") {
            config.pending_per_client = per_client;
        }

        if let Some(max_clients) = env_parse::<usize>("PENDING_MAX_CLIENTS") {
            config.pending_max_clients = max_clients;
        }

        if let Some(secs) = env_parse::<u64>("PENDING_TTL_SECS") {
            config.pending_ttl = Duration::from_secs(secs);
        }

        if let Some(policy) = env_parse::<OverflowPolicy>("PENDING_OVERFLOW_POLICY") {
            config.overflow_policy = policy;
        }

        if let Some(secs) = env_parse::<u64>("ANTI_ENTROPY_INTERVAL_SECS") {
            config.anti_entropy_interval = at_least_one_second(secs);
        }

        if let Some(workers) = env_parse::<usize>("OUTBOX_WORKERS") {
            config.outbox_workers = workers.max(1);
        }

        config
    }
}

/// Zero-length timer periods are not allowed.
fn at_least_one_second(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
