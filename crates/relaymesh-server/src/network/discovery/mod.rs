//! Seed Discovery
//!
//! Finds candidate peer addresses to join through. A [`SeedSource`] answers
//! one lookup; [`resolve_seeds`] retries it until enough seeds appear, and
//! [`spawn_rejoin_loop`] keeps redialing so partitions heal.
//!
//! Sources:
//! - `StaticSeeds`: a fixed list from configuration
//! - `HeadlessDns`: A records of a headless service
//! - `KubernetesEndpoints`: ready addresses of a service's Endpoints object
//! - `EtcdRegistry`: nodes registered under a lease in etcd

mod etcd;
mod kubernetes;
mod sources;

pub use etcd::EtcdRegistry;
pub use kubernetes::KubernetesEndpoints;
pub use sources::{HeadlessDns, StaticSeeds};

use crate::network::config::NetworkConfig;
use crate::network::membership::ClusterMembership;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no seeds found after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("dns lookup for {host} failed: {source}")]
    Dns {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kubernetes: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("etcd: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("etcd connection failed after retries: {0}")]
    EtcdConnect(String),
}

/// One lookup of candidate peer addresses.
#[async_trait]
pub trait SeedSource: Send + Sync + 'static {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Addresses as `ip:port`, `host:port` or multiaddr strings. May include
    /// this node's own address.
    async fn resolve(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Number of seeds this source can ever return, when known up front.
    fn expected(&self) -> Option<usize> {
        None
    }
}

/// How long to wait for enough seeds.
#[derive(Debug, Clone)]
pub struct SeedPolicy {
    pub quorum: usize,
    pub attempts: u32,
    pub delay: Duration,
}

impl From<&NetworkConfig> for SeedPolicy {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            quorum: config.seed_quorum,
            attempts: config.seed_attempts.max(1),
            delay: config.seed_retry_delay,
        }
    }
}

/// Resolve seeds, retrying until `quorum` are found or attempts run out.
///
/// Fewer than `quorum` seeds is accepted with a warning; none at all is an
/// error.
pub async fn resolve_seeds(
    source: &dyn SeedSource,
    policy: &SeedPolicy,
) -> Result<Vec<String>, DiscoveryError> {
    let quorum = source
        .expected()
        .map_or(policy.quorum, |n| n.min(policy.quorum))
        .max(1);
    let attempts = policy.attempts.max(1);
    let mut best: Vec<String> = Vec::new();

    for attempt in 1..=attempts {
        match source.resolve().await {
            Ok(seeds) => {
                debug!(source = %source.describe(), attempt, found = seeds.len(), "Resolved seeds");
                if seeds.len() > best.len() {
                    best = seeds;
                }
                if best.len() >= quorum {
                    info!(source = %source.describe(), seeds = best.len(), "Seed quorum reached");
                    return Ok(best);
                }
            }
            Err(e) => {
                warn!(source = %source.describe(), attempt, error = %e, "Seed lookup failed");
            }
        }

        if attempt < attempts {
            info!(
                attempt,
                found = best.len(),
                quorum,
                retry_in = ?policy.delay,
                "Waiting for more seeds"
            );
            tokio::time::sleep(policy.delay).await;
        }
    }

    if best.is_empty() {
        return Err(DiscoveryError::Exhausted { attempts });
    }
    warn!(
        seeds = best.len(),
        quorum,
        "Joining with fewer seeds than the quorum"
    );
    Ok(best)
}

/// Periodically re-resolve seeds and join through them again.
pub fn spawn_rejoin_loop(
    cluster: Arc<dyn ClusterMembership>,
    source: Arc<dyn SeedSource>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let seeds = match source.resolve().await {
                Ok(seeds) if !seeds.is_empty() => seeds,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "Rejoin: seed lookup failed");
                    continue;
                }
            };
            match cluster.join(&seeds).await {
                Ok(responded) => debug!(responded, members = cluster.members().len(), "Rejoin pass"),
                Err(e) => warn!(error = %e, "Rejoin failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one more seed on every lookup.
    struct GrowingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SeedSource for GrowingSource {
        fn describe(&self) -> String {
            "growing".to_string()
        }

        async fn resolve(&self) -> Result<Vec<String>, DiscoveryError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..n).map(|i| format!("10.0.0.{i}:8081")).collect())
        }
    }

    fn policy(quorum: usize, attempts: u32) -> SeedPolicy {
        SeedPolicy {
            quorum,
            attempts,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retries_until_quorum() {
        let source = GrowingSource {
            calls: AtomicUsize::new(0),
        };
        let seeds = resolve_seeds(&source, &policy(3, 10)).await.unwrap();
        assert_eq!(seeds.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_below_quorum_proceeds() {
        let source = GrowingSource {
            calls: AtomicUsize::new(0),
        };
        let seeds = resolve_seeds(&source, &policy(5, 3)).await.unwrap();
        assert_eq!(seeds.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_seeds_is_fatal() {
        let source = StaticSeeds::new(Vec::new());
        assert!(matches!(
            resolve_seeds(&source, &policy(3, 2)).await,
            Err(DiscoveryError::Exhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_static_list_does_not_wait_for_quorum() {
        let source = StaticSeeds::new(vec!["10.0.0.1:8081".to_string()]);
        let seeds = resolve_seeds(
            &source,
            &SeedPolicy {
                quorum: 3,
                attempts: 10,
                delay: Duration::from_secs(3600),
            },
        )
        .await
        .unwrap();
        assert_eq!(seeds, vec!["10.0.0.1:8081".to_string()]);
    }
}
