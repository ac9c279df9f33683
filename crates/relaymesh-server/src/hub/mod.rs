//! Relay Hub
//!
//! Routes client messages to local connections, to the owning peer node, or
//! into a bounded pending buffer until the recipient shows up somewhere.
//!
//! ## Architecture
//!
//! ```text
//!   WebSocket reader ──RouteMessage──▶ ┌─────────┐ ──try_enqueue──▶ connection queue
//!   peer inbox pump ──InboundPeerBytes▶│   Hub   │
//!   membership pump ─MemberJoined/Left▶│ (actor) │ ──submit──▶ Outbox ──▶ send_reliable
//!   pending sweep ──────ExpirePending─▶│         │
//!   anti-entropy ──────AntiEntropyTick▶└─────────┘ ──snapshot──▶ PresenceSync
//!                                           │ writes
//!                                       Directory
//! ```
//!
//! The hub actor is the only writer of the [`Directory`] and the only owner
//! of the [`PendingBuffer`]. Nothing on the hub's path awaits the network.

pub mod config;
pub mod connection;
pub mod directory;
pub mod messages;
pub mod outbox;
pub mod pending;
pub mod presence;
pub mod router;

pub use config::{HubConfig, OverflowPolicy};
pub use connection::{ConnectionHandle, ConnectionId, EnqueueError};
pub use directory::{Directory, DirectoryStats, Location};
pub use messages::{
    AntiEntropyTick, ExpirePending, GetHubStats, HubStats, InboundPeerBytes, MemberJoined, MemberLeft, Register,
    RegisterAck, RouteMessage, RouteReport, Unregister,
};
pub use outbox::{FrameKind, OutboundFrame, Outbox, OutboxError};
pub use pending::{BufferOutcome, PendingBuffer};
pub use presence::PresenceSync;
pub use router::Hub;

use crate::network::membership::{ClusterMembership, MembershipEvent, PeerDelivery};
use kameo::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `tokio::time::interval` panics on a zero period.
const MIN_TICK: Duration = Duration::from_millis(1);

/// A running hub with its background tasks.
pub struct HubRuntime {
    hub: ActorRef<Hub>,
    directory: Arc<Directory>,
    config: HubConfig,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl HubRuntime {
    /// Spawn the hub actor, the outbox workers, and the pumps that feed it.
    ///
    /// `inbound` is the receiving side of the [`PeerInbox`](crate::network::membership::PeerInbox)
    /// given to the cluster layer.
    pub fn start(
        cluster: Arc<dyn ClusterMembership>,
        inbound: mpsc::Receiver<PeerDelivery>,
        config: HubConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let directory = Arc::new(Directory::new());
        // Subscribe before anything can join so no membership event is missed
        let membership = cluster.subscribe();

        let (outbox, mut tasks) = Outbox::spawn(
            cluster.clone(),
            config.outbox_workers,
            config.outbox_capacity,
            cancel.clone(),
        );
        let presence = Arc::new(PresenceSync::new(
            cluster.clone(),
            outbox.clone(),
            directory.clone(),
            config.snapshot_chunk,
        ));

        let hub = Hub::spawn(Hub::new(
            cluster.clone(),
            directory.clone(),
            outbox,
            presence,
            config.clone(),
        ));

        tasks.push(spawn_peer_pump(hub.clone(), inbound, cancel.clone()));
        tasks.push(spawn_membership_pump(
            hub.clone(),
            membership,
            cancel.clone(),
        ));
        tasks.push(spawn_pending_sweep(
            hub.clone(),
            config.pending_sweep_interval,
            cancel.clone(),
        ));
        tasks.push(spawn_anti_entropy_ticker(
            hub.clone(),
            config.anti_entropy_interval,
            cancel.clone(),
        ));

        info!(
            node_name = %cluster.local_name(),
            outbox_workers = config.outbox_workers,
            max_hops = config.max_hops,
            "Hub started"
        );

        Self {
            hub,
            directory,
            config,
            cancel,
            tasks,
        }
    }

    pub fn hub(&self) -> &ActorRef<Hub> {
        &self.hub
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Stop the pumps, then the actor.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        if let Err(e) = self.hub.stop_gracefully().await {
            warn!(error = %e, "Hub actor did not stop cleanly");
        }
        self.hub.wait_for_shutdown().await;
        debug!("Hub stopped");
    }
}

fn spawn_peer_pump(
    hub: ActorRef<Hub>,
    mut inbound: mpsc::Receiver<PeerDelivery>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = inbound.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            let msg = InboundPeerBytes {
                from: delivery.from,
                bytes: delivery.bytes,
            };
            if let Err(e) = hub.tell(msg).await {
                warn!(error = %e, "Hub rejected peer payload");
                break;
            }
        }
    })
}

fn spawn_membership_pump(
    hub: ActorRef<Hub>,
    mut events: broadcast::Receiver<MembershipEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let sent = match event {
                Ok(MembershipEvent::Joined(member)) => hub
                    .tell(MemberJoined { member })
                    .await
                    .map_err(|e| e.to_string()),
                Ok(MembershipEvent::Left(name)) => hub
                    .tell(MemberLeft { name })
                    .await
                    .map_err(|e| e.to_string()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Anti-entropy repairs joins; missed departures wait for the next pass
                    warn!(skipped, "Membership events lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if let Err(error) = sent {
                warn!(%error, "Hub rejected membership event");
                break;
            }
        }
    })
}

fn spawn_pending_sweep(
    hub: ActorRef<Hub>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
        ticker.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if hub.tell(ExpirePending).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Ask the hub to push its local snapshot to every member.
///
/// The snapshot is taken inside the actor so it never races a register or
/// unregister that is still queued behind it.
fn spawn_anti_entropy_ticker(
    hub: ActorRef<Hub>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if hub.tell(AntiEntropyTick).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
