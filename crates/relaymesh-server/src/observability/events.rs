//! Structured Events
//!
//! One function per notable state change so field names stay consistent
//! across the code base. Every event carries an `event_type` field.

use tracing::{debug, info, warn};

/// Emit a client registered event
pub fn client_registered(client_id: &str, connection: &str, node_name: &str, flushed: usize) {
    info!(
        event_type = "client_registered",
        client_id = %client_id,
        connection = %connection,
        node_name = %node_name,
        flushed = flushed,
        "Client registered"
    );
}

/// Emit a client unregistered event
pub fn client_unregistered(client_id: &str, connection: &str, node_name: &str) {
    info!(
        event_type = "client_unregistered",
        client_id = %client_id,
        connection = %connection,
        node_name = %node_name,
        "Client unregistered"
    );
}

/// Emit a slow consumer eviction event
pub fn slow_consumer_evicted(client_id: &str, connection: &str, reason: &str) {
    warn!(
        event_type = "slow_consumer_evicted",
        client_id = %client_id,
        connection = %connection,
        reason = %reason,
        "Slow consumer evicted"
    );
}

/// Emit an ownership moved event
pub fn ownership_moved(client_id: &str, previous_owner: &str, new_owner: &str) {
    info!(
        event_type = "ownership_moved",
        client_id = %client_id,
        previous_owner = %previous_owner,
        new_owner = %new_owner,
        "Client ownership moved"
    );
}

/// Emit a stale entries purged event
pub fn stale_entries_purged(node_name: &str, count: usize) {
    info!(
        event_type = "stale_entries_purged",
        node_name = %node_name,
        count = count,
        "Purged directory entries of departed node"
    );
}

/// Emit an anti-entropy pass event
pub fn anti_entropy_pass(node_name: &str, client_ids: usize, peers: usize) {
    debug!(
        event_type = "anti_entropy_pass",
        node_name = %node_name,
        client_ids = client_ids,
        peers = peers,
        "Presence snapshot broadcast"
    );
}

/// Emit a peer joined event
pub fn peer_joined(peer_id: &str, address: &str, cluster_id: &str) {
    info!(
        event_type = "peer_joined",
        peer_id = %peer_id,
        address = %address,
        cluster_id = %cluster_id,
        "Peer joined"
    );
}

/// Emit a peer departed event
pub fn peer_departed(peer_id: &str, cluster_id: &str) {
    warn!(
        event_type = "peer_departed",
        peer_id = %peer_id,
        cluster_id = %cluster_id,
        "Peer departed"
    );
}

/// Emit a cluster joined event
pub fn cluster_joined(node_name: &str, seeds: usize, responded: usize) {
    info!(
        event_type = "cluster_joined",
        node_name = %node_name,
        seeds = seeds,
        responded = responded,
        "Joined cluster"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        client_registered("alice", "conn-1", "node-a", 2);
        client_unregistered("alice", "conn-1", "node-a");
        slow_consumer_evicted("alice", "conn-1", "queue_full");
        ownership_moved("alice", "node-a", "node-b");
        stale_entries_purged("node-b", 3);
        anti_entropy_pass("node-a", 10, 2);
        peer_joined("peer-123", "/ip4/10.0.0.1/tcp/8081", "cluster-1");
        peer_departed("peer-123", "cluster-1");
        cluster_joined("node-a", 3, 2);
    }
}
