//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `relaymesh_local_clients` - gauge of clients attached to this node
//! - `relaymesh_remote_clients` - gauge of clients known on other nodes
//! - `relaymesh_client_connections_total` - counter of attach/detach by event
//! - `relaymesh_route_total` - counter of routing decisions by outcome
//! - `relaymesh_pending_clients` / `relaymesh_pending_messages` - pending buffer size
//! - `relaymesh_pending_expired_total` - counter of buffered messages dropped by TTL
//! - `relaymesh_peer_send_total` - counter of peer sends by kind and outcome
//! - `relaymesh_peer_send_duration_seconds` - histogram of reliable send latency
//! - `relaymesh_peer_frames_dropped_total` - counter of inbound frames dropped
//! - `relaymesh_anti_entropy_passes_total` - counter of snapshot broadcasts
//! - `relaymesh_peer_count` - gauge of cluster members other than this node
//! - `relaymesh_peer_ping_duration_seconds` - histogram of ping latencies

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Client metrics
    describe_gauge!(
        "relaymesh_local_clients",
        "Number of clients attached to this node"
    );
    describe_gauge!(
        "relaymesh_remote_clients",
        "Number of clients known to be attached to other nodes"
    );
    describe_counter!(
        "relaymesh_client_connections_total",
        "Client attach and detach events"
    );

    // Routing metrics
    describe_counter!(
        "relaymesh_route_total",
        "Routing decisions per recipient by outcome"
    );
    describe_gauge!(
        "relaymesh_pending_clients",
        "Clients with buffered messages"
    );
    describe_gauge!(
        "relaymesh_pending_messages",
        "Messages held in the pending buffer"
    );
    describe_counter!(
        "relaymesh_pending_expired_total",
        "Buffered messages dropped after their TTL"
    );

    // Peer metrics
    describe_counter!(
        "relaymesh_peer_send_total",
        "Frames sent to peers by kind and outcome"
    );
    describe_histogram!(
        "relaymesh_peer_send_duration_seconds",
        "Duration of reliable peer sends in seconds"
    );
    describe_counter!(
        "relaymesh_peer_frames_dropped_total",
        "Inbound peer frames dropped by reason"
    );
    describe_counter!(
        "relaymesh_anti_entropy_passes_total",
        "Presence snapshot broadcasts"
    );
    describe_gauge!(
        "relaymesh_peer_count",
        "Number of cluster members other than this node"
    );
    describe_histogram!(
        "relaymesh_peer_ping_duration_seconds",
        "Duration of peer ping round-trips in seconds"
    );
}

/// Update the local clients gauge
pub fn set_local_clients(count: usize) {
    gauge!("relaymesh_local_clients").set(count as f64);
}

/// Update the remote clients gauge
pub fn set_remote_clients(count: usize) {
    gauge!("relaymesh_remote_clients").set(count as f64);
}

/// Record a client attach or detach
pub fn record_client_connection(event: &'static str) {
    counter!("relaymesh_client_connections_total", "event" => event).increment(1);
}

/// Record one routing decision
pub fn record_route(outcome: &'static str) {
    counter!("relaymesh_route_total", "outcome" => outcome).increment(1);
}

/// Update the pending buffer gauges
pub fn set_pending(clients: usize, messages: usize) {
    gauge!("relaymesh_pending_clients").set(clients as f64);
    gauge!("relaymesh_pending_messages").set(messages as f64);
}

/// Record buffered messages dropped by TTL
pub fn record_pending_expired(count: usize) {
    counter!("relaymesh_pending_expired_total").increment(count as u64);
}

/// Record a peer send attempt
pub fn record_peer_send(kind: &'static str, outcome: &'static str) {
    counter!(
        "relaymesh_peer_send_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record how long a reliable peer send took
pub fn record_peer_send_duration(kind: &'static str, duration: Duration) {
    histogram!("relaymesh_peer_send_duration_seconds", "kind" => kind)
        .record(duration.as_secs_f64());
}

/// Record an inbound peer frame that was dropped
pub fn record_peer_frame_dropped(reason: &'static str) {
    counter!("relaymesh_peer_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a presence snapshot broadcast
pub fn record_anti_entropy_pass() {
    counter!("relaymesh_anti_entropy_passes_total").increment(1);
}

/// Update the peer count gauge
pub fn set_peer_count(count: usize) {
    gauge!("relaymesh_peer_count").set(count as f64);
}

/// Record a ping duration
pub fn record_ping_duration(peer_id: &str, duration: Duration) {
    histogram!(
        "relaymesh_peer_ping_duration_seconds",
        "peer_id" => peer_id.to_string()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_recording() {
        // No recorder installed; calls must still be safe
        set_local_clients(3);
        set_remote_clients(7);
        record_client_connection("registered");
        record_route("local");
        set_pending(1, 4);
        record_pending_expired(2);
        record_peer_send("message", "ok");
        record_peer_send_duration("message", Duration::from_millis(3));
        record_peer_frame_dropped("malformed");
        record_anti_entropy_pass();
        set_peer_count(2);
        record_ping_duration("abc123", Duration::from_millis(50));
    }
}
