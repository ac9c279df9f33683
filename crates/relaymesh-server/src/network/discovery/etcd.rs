//! Etcd seed registry.
//!
//! Each node writes its advertised address under a lease and reads back every
//! address under the cluster prefix. The lease is kept alive in the
//! background; when keep-alive fails the node re-registers on the next lookup.

use super::{DiscoveryError, SeedSource};
use crate::network::config::NetworkConfig;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

pub struct EtcdRegistry {
    client: Client,
    cluster_id: String,
    node_name: String,
    advertised: String,
    lease_ttl: i64,
    keepalive_interval: Duration,
    registered: Arc<AtomicBool>,
    register_lock: Mutex<()>,
}

impl EtcdRegistry {
    /// Connect to etcd with exponential backoff.
    pub async fn connect(
        config: &NetworkConfig,
        node_name: impl Into<String>,
        advertised: impl Into<String>,
    ) -> Result<Self, DiscoveryError> {
        let backoff = ExponentialBackoff {
            initial_interval: config.etcd_backoff_initial,
            max_interval: config.etcd_backoff_max,
            max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
            multiplier: config.etcd_backoff_multiplier,
            ..Default::default()
        };

        let endpoints = config.etcd_endpoints.clone();
        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!("Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| DiscoveryError::EtcdConnect(e.to_string()))?;

        Ok(Self {
            client,
            cluster_id: config.cluster_id.clone(),
            node_name: node_name.into(),
            advertised: advertised.into(),
            lease_ttl: config.lease_ttl,
            keepalive_interval: config.keepalive_interval,
            registered: Arc::new(AtomicBool::new(false)),
            register_lock: Mutex::new(()),
        })
    }

    fn node_key(&self) -> String {
        node_key(&self.cluster_id, &self.node_name)
    }

    async fn ensure_registered(&self) -> Result<(), DiscoveryError> {
        let _guard = self.register_lock.lock().await;
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut client = self.client.clone();
        let lease = client.lease_grant(self.lease_ttl, None).await?;
        let lease_id = lease.id();
        client
            .put(
                self.node_key(),
                self.advertised.clone(),
                Some(PutOptions::new().with_lease(lease_id)),
            )
            .await?;
        let (keeper, stream) = client.lease_keep_alive(lease_id).await?;

        self.registered.store(true, Ordering::Release);
        spawn_keepalive_task(
            keeper,
            stream,
            lease_id,
            self.keepalive_interval,
            self.registered.clone(),
        );
        info!(
            key = %self.node_key(),
            lease_id,
            ttl = self.lease_ttl,
            "Registered node in etcd"
        );
        Ok(())
    }

    /// Remove this node's key so other nodes stop seeing it.
    pub async fn deregister(&self) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        client.delete(self.node_key(), None).await?;
        self.registered.store(false, Ordering::Release);
        Ok(())
    }
}

/// Key a node registers under.
pub fn node_key(cluster_id: &str, node_name: &str) -> String {
    format!("{}{}", nodes_prefix(cluster_id), node_name)
}

/// Prefix holding every node of a cluster.
pub fn nodes_prefix(cluster_id: &str) -> String {
    format!("/relaymesh/v1/clusters/{cluster_id}/nodes/")
}

#[async_trait]
impl SeedSource for EtcdRegistry {
    fn describe(&self) -> String {
        format!("etcd({})", nodes_prefix(&self.cluster_id))
    }

    async fn resolve(&self) -> Result<Vec<String>, DiscoveryError> {
        self.ensure_registered().await?;

        let mut client = self.client.clone();
        let resp = client
            .get(
                nodes_prefix(&self.cluster_id),
                Some(GetOptions::new().with_prefix()),
            )
            .await?;

        let seeds = resp
            .kvs()
            .iter()
            .filter_map(|kv| kv.value_str().ok().map(String::from))
            .collect();
        Ok(seeds)
    }
}

/// Send periodic keep-alives for the lease. On failure the registration
/// flag is cleared so the next lookup registers again.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut keeper_stream: LeaseKeepAliveStream,
    lease_id: i64,
    keepalive_interval: Duration,
    registered: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;
            if !registered.load(Ordering::Acquire) {
                break;
            }

            if let Err(e) = keeper.keep_alive().await {
                error!(lease_id, error = %e, "Keep-alive send failed");
                break;
            }

            match keeper_stream.message().await {
                Ok(Some(resp)) if resp.ttl() > 0 => {
                    trace!(lease_id, ttl = resp.ttl(), "Keep-alive OK");
                }
                Ok(Some(_)) => {
                    error!(lease_id, "Lease expired");
                    break;
                }
                Ok(None) => {
                    error!(lease_id, "Keep-alive stream closed");
                    break;
                }
                Err(e) => {
                    error!(lease_id, error = %e, "Keep-alive failed");
                    break;
                }
            }
        }
        registered.store(false, Ordering::Release);
    })
}
