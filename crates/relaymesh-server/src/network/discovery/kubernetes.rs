//! Kubernetes Endpoints seed source.

use super::{DiscoveryError, SeedSource};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::{Api, Client};
use tracing::debug;

/// Ready addresses of a service's Endpoints object, paired with the P2P port.
#[derive(Clone)]
pub struct KubernetesEndpoints {
    api: Api<Endpoints>,
    namespace: String,
    service: String,
    p2p_port: u16,
}

impl KubernetesEndpoints {
    /// Connect with in-cluster or kubeconfig credentials.
    pub async fn connect(
        namespace: impl Into<String>,
        service: impl Into<String>,
        p2p_port: u16,
    ) -> Result<Self, DiscoveryError> {
        let namespace = namespace.into();
        let client = Client::try_default().await?;
        Ok(Self {
            api: Api::namespaced(client, &namespace),
            namespace,
            service: service.into(),
            p2p_port,
        })
    }
}

/// Ready IPs of an Endpoints object joined with `port`.
pub fn endpoint_seeds(endpoints: &Endpoints, port: u16) -> Vec<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|addr| format!("{}:{}", addr.ip, port))
        .collect()
}

#[async_trait]
impl SeedSource for KubernetesEndpoints {
    fn describe(&self) -> String {
        format!("kubernetes({}/{})", self.namespace, self.service)
    }

    async fn resolve(&self) -> Result<Vec<String>, DiscoveryError> {
        let endpoints = self.api.get(&self.service).await?;
        let seeds = endpoint_seeds(&endpoints, self.p2p_port);
        debug!(
            namespace = %self.namespace,
            service = %self.service,
            found = seeds.len(),
            "Listed service endpoints"
        );
        Ok(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};

    fn address(ip: &str) -> EndpointAddress {
        EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_only_ready_addresses_are_seeds() {
        let endpoints = Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![address("10.1.0.4"), address("10.1.0.5")]),
                not_ready_addresses: Some(vec![address("10.1.0.6")]),
                ..Default::default()
            }]),
            ..Default::default()
        };

        assert_eq!(
            endpoint_seeds(&endpoints, 8081),
            vec!["10.1.0.4:8081".to_string(), "10.1.0.5:8081".to_string()]
        );
    }

    #[test]
    fn test_empty_endpoints() {
        assert!(endpoint_seeds(&Endpoints::default(), 8081).is_empty());
    }
}
