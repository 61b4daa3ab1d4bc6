//! Endpoint Discovery Variants
//!
//! External host lookup differs per platform: router/ingress platforms
//! expose named routes, plain load-balancer platforms expose service
//! hostnames. One seam, two implementations, selected once at controller
//! construction.

use amc_model::AddressSpace;

/// External endpoint host lookup
pub trait EndpointDiscovery: Send + Sync {
    /// External host serving a logical service of a space, when exposed
    fn external_host(&self, space: &AddressSpace, service: &str) -> Option<String>;
}

/// Route-based discovery: hosts are derived from a cluster routing domain
pub struct RouteDiscovery {
    /// Wildcard routing domain, e.g. "apps.cluster.example"
    pub domain: String,
}

impl RouteDiscovery {
    /// Discovery against a routing domain
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }
}

impl EndpointDiscovery for RouteDiscovery {
    fn external_host(&self, space: &AddressSpace, service: &str) -> Option<String> {
        let uuid = space.infra_uuid()?;
        Some(format!("{service}-{uuid}.{}", self.domain))
    }
}

/// Load-balancer discovery: hosts are the per-service load-balancer names
pub struct LoadBalancerDiscovery {
    /// Namespace the infrastructure services live in
    pub infra_namespace: String,
}

impl LoadBalancerDiscovery {
    /// Discovery against load-balancer service names
    pub fn new(infra_namespace: &str) -> Self {
        Self {
            infra_namespace: infra_namespace.to_string(),
        }
    }
}

impl EndpointDiscovery for LoadBalancerDiscovery {
    fn external_host(&self, space: &AddressSpace, service: &str) -> Option<String> {
        let uuid = space.infra_uuid()?;
        Some(format!(
            "{service}-{uuid}.{}.svc.cluster.local",
            self.infra_namespace
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amc_model::{space::annotation, AddressSpaceType};

    fn space_with_uuid() -> AddressSpace {
        let mut space = AddressSpace::new(
            "app",
            "prod",
            AddressSpaceType::Standard,
            "standard-small",
            "default-auth",
        );
        space
            .annotations
            .insert(annotation::INFRA_UUID.into(), "1234".into());
        space
    }

    #[test]
    fn test_route_discovery_host() {
        let discovery = RouteDiscovery::new("apps.cluster.example");
        let host = discovery.external_host(&space_with_uuid(), "messaging");
        assert_eq!(host.as_deref(), Some("messaging-1234.apps.cluster.example"));
    }

    #[test]
    fn test_load_balancer_discovery_host() {
        let discovery = LoadBalancerDiscovery::new("amc-infra");
        let host = discovery.external_host(&space_with_uuid(), "console");
        assert_eq!(
            host.as_deref(),
            Some("console-1234.amc-infra.svc.cluster.local")
        );
    }

    #[test]
    fn test_no_host_before_uuid_assignment() {
        let discovery = RouteDiscovery::new("apps.cluster.example");
        let space = AddressSpace::new(
            "app",
            "prod",
            AddressSpaceType::Standard,
            "standard-small",
            "default-auth",
        );
        assert!(discovery.external_host(&space, "messaging").is_none());
    }
}
