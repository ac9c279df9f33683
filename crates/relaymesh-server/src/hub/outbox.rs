//! Peer Outbox
//!
//! Bounded pool of workers that perform reliable peer sends on behalf of the
//! hub actor, which never waits on the network itself. Frames are sharded by
//! destination so frames for one peer are sent in submission order.

use crate::network::membership::{ClusterMember, ClusterMembership};
use crate::observability::metrics;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What a frame carries, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Presence,
    Message,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Presence => "presence",
            FrameKind::Message => "message",
        }
    }
}

#[derive(Debug)]
pub struct OutboundFrame {
    pub target: ClusterMember,
    pub bytes: Vec<u8>,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxError {
    Full,
    Closed,
}

#[derive(Clone)]
pub struct Outbox {
    shards: Arc<Vec<mpsc::Sender<OutboundFrame>>>,
}

impl Outbox {
    /// Spawn `workers` send loops, each with a queue of `capacity` frames.
    pub fn spawn(
        cluster: Arc<dyn ClusterMembership>,
        workers: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let workers = workers.max(1);
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            shards.push(tx);
            handles.push(tokio::spawn(run_worker(
                worker,
                rx,
                cluster.clone(),
                cancel.clone(),
            )));
        }

        (
            Self {
                shards: Arc::new(shards),
            },
            handles,
        )
    }

    fn shard_for(&self, target: &str) -> &mpsc::Sender<OutboundFrame> {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Queue one frame without waiting. A full queue drops the frame.
    pub fn submit(&self, frame: OutboundFrame) -> Result<(), OutboxError> {
        let kind = frame.kind;
        self.shard_for(&frame.target.name)
            .try_send(frame)
            .map_err(|e| {
                let (err, reason) = match e {
                    mpsc::error::TrySendError::Full(_) => (OutboxError::Full, "outbox_full"),
                    mpsc::error::TrySendError::Closed(_) => (OutboxError::Closed, "outbox_closed"),
                };
                metrics::record_peer_send(kind.as_str(), reason);
                err
            })
    }

    /// Queue the same frame for every target. Returns how many were queued.
    pub fn fan_out(&self, targets: &[ClusterMember], bytes: &[u8], kind: FrameKind) -> usize {
        targets
            .iter()
            .filter(|target| {
                self.submit(OutboundFrame {
                    target: (*target).clone(),
                    bytes: bytes.to_vec(),
                    kind,
                })
                .is_ok()
            })
            .count()
    }
}

async fn run_worker(
    worker: usize,
    mut rx: mpsc::Receiver<OutboundFrame>,
    cluster: Arc<dyn ClusterMembership>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let started = Instant::now();
        let kind = frame.kind.as_str();
        match cluster.send_reliable(&frame.target, frame.bytes).await {
            Ok(()) => {
                trace!(worker, target = %frame.target.name, kind, "Peer send ok");
                metrics::record_peer_send(kind, "ok");
                metrics::record_peer_send_duration(kind, started.elapsed());
            }
            Err(e) => {
                // Not retried; anti-entropy repairs lost presence
                debug!(worker, target = %frame.target.name, kind, error = %e, "Peer send failed");
                metrics::record_peer_send(kind, "error");
            }
        }
    }
    trace!(worker, "Outbox worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::membership::PeerInbox;
    use crate::network::memory::MemoryNetwork;

    #[tokio::test]
    async fn test_frames_reach_peer_in_order() {
        let net = MemoryNetwork::new();
        let (inbox_a, _rx_a) = PeerInbox::channel(16);
        let (inbox_b, mut rx_b) = PeerInbox::channel(16);
        let a = Arc::new(net.node("a", "addr-a", Arc::new(inbox_a)));
        let b = net.node("b", "addr-b", Arc::new(inbox_b));
        a.join(&["addr-a".to_string()]).await.unwrap();
        b.join(&["addr-a".to_string()]).await.unwrap();

        let cancel = CancellationToken::new();
        let (outbox, _workers) = Outbox::spawn(a.clone(), 3, 16, cancel.clone());
        let target = a.member("b").unwrap();
        for i in 0..5u8 {
            outbox
                .submit(OutboundFrame {
                    target: target.clone(),
                    bytes: vec![i],
                    kind: FrameKind::Message,
                })
                .unwrap();
        }

        for i in 0..5u8 {
            let delivery = rx_b.recv().await.unwrap();
            assert_eq!(delivery.from, "a");
            assert_eq!(delivery.bytes, vec![i]);
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_fan_out_counts_queued_frames() {
        let net = MemoryNetwork::new();
        let (inbox, _rx) = PeerInbox::channel(16);
        let a = Arc::new(net.node("a", "addr-a", Arc::new(inbox)));
        let cancel = CancellationToken::new();
        let (outbox, _workers) = Outbox::spawn(a, 2, 4, cancel.clone());

        let targets = vec![
            ClusterMember { name: "b".into(), address: "addr-b".into() },
            ClusterMember { name: "c".into(), address: "addr-c".into() },
        ];
        assert_eq!(outbox.fan_out(&targets, b"x", FrameKind::Presence), 2);
        cancel.cancel();
    }
}
