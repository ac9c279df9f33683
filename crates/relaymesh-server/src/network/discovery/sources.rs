//! Static and DNS seed sources.

use super::{DiscoveryError, SeedSource};
use async_trait::async_trait;
use tracing::debug;

/// A fixed seed list.
#[derive(Debug, Clone)]
pub struct StaticSeeds {
    seeds: Vec<String>,
}

impl StaticSeeds {
    pub fn new(seeds: Vec<String>) -> Self {
        Self { seeds }
    }

    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

#[async_trait]
impl SeedSource for StaticSeeds {
    fn describe(&self) -> String {
        format!("static({})", self.seeds.len())
    }

    async fn resolve(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.seeds.clone())
    }

    fn expected(&self) -> Option<usize> {
        Some(self.seeds.len())
    }
}

/// Every A/AAAA record of a headless service, paired with the P2P port.
///
/// The result includes this node's own pod, which membership treats as an
/// already-responding seed.
#[derive(Debug, Clone)]
pub struct HeadlessDns {
    service_dns: String,
    p2p_port: u16,
}

impl HeadlessDns {
    pub fn new(service_dns: impl Into<String>, p2p_port: u16) -> Self {
        Self {
            service_dns: service_dns.into(),
            p2p_port,
        }
    }

    /// `<service>.<namespace>.svc.cluster.local`
    pub fn for_service(service: &str, namespace: &str, p2p_port: u16) -> Self {
        Self::new(format!("{service}.{namespace}.svc.cluster.local"), p2p_port)
    }
}

#[async_trait]
impl SeedSource for HeadlessDns {
    fn describe(&self) -> String {
        format!("dns({})", self.service_dns)
    }

    async fn resolve(&self) -> Result<Vec<String>, DiscoveryError> {
        let host = format!("{}:{}", self.service_dns, self.p2p_port);
        let addrs = tokio::net::lookup_host(&host)
            .await
            .map_err(|source| DiscoveryError::Dns {
                host: self.service_dns.clone(),
                source,
            })?;

        let mut seeds: Vec<String> = addrs.map(|a| a.to_string()).collect();
        seeds.sort();
        seeds.dedup();
        debug!(service_dns = %self.service_dns, found = seeds.len(), "Resolved headless service");
        Ok(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_parse_skips_blanks() {
        let source = StaticSeeds::parse("10.0.0.1:8081, ,10.0.0.2:8081,");
        assert_eq!(source.expected(), Some(2));
        assert_eq!(
            source.resolve().await.unwrap(),
            vec!["10.0.0.1:8081".to_string(), "10.0.0.2:8081".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dns_resolves_localhost() {
        let source = HeadlessDns::new("localhost", 8081);
        let seeds = source.resolve().await.unwrap();
        assert!(seeds.iter().all(|s| s.ends_with(":8081")));
        assert!(!seeds.is_empty());
    }

    #[test]
    fn test_service_dns_name() {
        let source = HeadlessDns::for_service("relay", "prod", 8081);
        assert_eq!(source.describe(), "dns(relay.prod.svc.cluster.local)");
    }
}
