//! Address Space Data Model

use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation keys recognised on address spaces and infra configs
pub mod annotation {
    /// Stable UUID assigned to a space's infrastructure, set once by the controller
    pub const INFRA_UUID: &str = "amc.io/infra-uuid";
    /// Enables the MQTT gateway overlay on a standard space ("true"/"false")
    pub const WITH_MQTT: &str = "amc.io/with-mqtt";
    /// Overrides the infra template name
    pub const TEMPLATE_NAME: &str = "amc.io/template-name";
    /// Overrides the MQTT overlay template name
    pub const MQTT_TEMPLATE_NAME: &str = "amc.io/mqtt-template-name";
    /// Authentication realm fallback when the auth service declares none
    pub const REALM_NAME: &str = "amc.io/realm-name";
    /// OAuth URL published by the auth service
    pub const OAUTH_URL: &str = "amc.io/oauth-url";
}

/// Address space flavour selecting the infra template family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpaceType {
    /// Router mesh plus broker pool
    Standard,
    /// Single broker, no router layer
    Brokered,
}

impl fmt::Display for AddressSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Brokered => "brokered",
        })
    }
}

/// TLS certificate binding for an exposed endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CertSpec {
    /// Name of the secret holding the certificate
    pub secret_name: String,
}

/// Exposed endpoint declared on an address space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Endpoint name
    pub name: String,
    /// Logical service the endpoint fronts ("messaging", "console", "mqtt")
    pub service: String,
    /// Certificate binding, when TLS is terminated for this endpoint
    pub cert: Option<CertSpec>,
}

/// Reconcile state machine phase for an address space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpacePhase {
    /// Observed, not yet reconciled
    Pending,
    /// Infrastructure is being created
    Provisioning,
    /// Desired state applied, all addresses admitted
    Ready,
    /// Serving with reduced function: quota-rejected addresses, or a
    /// dependency went away after the space was provisioned
    Degraded,
    /// Fatal configuration error, operator intervention required
    Failed,
    /// Space deleted, infrastructure being torn down
    Terminating,
    /// Teardown complete
    Deleted,
}

impl SpacePhase {
    /// Phases in which the space serves traffic
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    /// Terminal until a relevant input changes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Deleted)
    }
}

impl fmt::Display for SpacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Provisioning => "Provisioning",
            Self::Ready => "Ready",
            Self::Degraded => "Degraded",
            Self::Failed => "Failed",
            Self::Terminating => "Terminating",
            Self::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Identity of an address space: namespace plus name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl SpaceKey {
    /// Build a key
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A tenant-scoped messaging namespace with its own infrastructure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpace {
    /// Space name
    pub name: String,
    /// Namespace the space was declared in
    pub namespace: String,
    /// Template family selector
    pub space_type: AddressSpaceType,
    /// Selected address space plan
    pub plan: String,
    /// Referenced authentication service
    pub authentication_service: String,
    /// Infra config override; the plan's reference is used when absent
    pub infra_config: Option<String>,
    /// Exposed endpoints
    pub endpoints: Vec<EndpointSpec>,
    /// Annotations (infra UUID, MQTT flag, template overrides)
    pub annotations: BTreeMap<String, String>,
    /// Current status, written only by the reconcile loop
    pub status: AddressSpaceStatus,
}

impl AddressSpace {
    /// Create a space with default endpoints and pending status
    pub fn new(
        namespace: &str,
        name: &str,
        space_type: AddressSpaceType,
        plan: &str,
        authentication_service: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            space_type,
            plan: plan.to_string(),
            authentication_service: authentication_service.to_string(),
            infra_config: None,
            endpoints: Vec::new(),
            annotations: BTreeMap::new(),
            status: AddressSpaceStatus::default(),
        }
    }

    /// Identity key
    pub fn key(&self) -> SpaceKey {
        SpaceKey::new(&self.namespace, &self.name)
    }

    /// Stable infra UUID, once assigned by the controller
    pub fn infra_uuid(&self) -> Option<&str> {
        self.annotations.get(annotation::INFRA_UUID).map(|s| s.as_str())
    }

    /// Whether the MQTT gateway overlay is enabled
    pub fn with_mqtt(&self) -> bool {
        self.annotations
            .get(annotation::WITH_MQTT)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Certificate secret name for a logical service, when declared
    pub fn endpoint_cert_secret(&self, service: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .filter(|e| e.service == service)
            .find_map(|e| e.cert.as_ref())
            .map(|c| c.secret_name.as_str())
    }
}

/// Address space status: phase, conditions, discovered endpoint hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpaceStatus {
    /// Reconcile phase
    pub phase: SpacePhase,
    /// Whether the space is serving
    pub ready: bool,
    /// Condition list
    pub conditions: Vec<Condition>,
    /// External host per logical service, filled from endpoint discovery
    pub endpoint_hosts: BTreeMap<String, String>,
}

impl Default for AddressSpaceStatus {
    fn default() -> Self {
        Self {
            phase: SpacePhase::Pending,
            ready: false,
            conditions: Vec::new(),
            endpoint_hosts: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_cert_lookup() {
        let mut space = AddressSpace::new("app", "prod", AddressSpaceType::Standard, "standard-small", "default-auth");
        space.endpoints.push(EndpointSpec {
            name: "amqps".into(),
            service: "messaging".into(),
            cert: Some(CertSpec { secret_name: "prod-messaging-cert".into() }),
        });
        space.endpoints.push(EndpointSpec {
            name: "https".into(),
            service: "console".into(),
            cert: None,
        });

        assert_eq!(space.endpoint_cert_secret("messaging"), Some("prod-messaging-cert"));
        assert_eq!(space.endpoint_cert_secret("console"), None);
        assert_eq!(space.endpoint_cert_secret("mqtt"), None);
    }

    #[test]
    fn test_mqtt_flag() {
        let mut space = AddressSpace::new("app", "prod", AddressSpaceType::Standard, "standard-small", "default-auth");
        assert!(!space.with_mqtt());
        space.annotations.insert(annotation::WITH_MQTT.into(), "true".into());
        assert!(space.with_mqtt());
    }

    #[test]
    fn test_phase_predicates() {
        assert!(SpacePhase::Ready.is_serving());
        assert!(SpacePhase::Degraded.is_serving());
        assert!(!SpacePhase::Failed.is_serving());
        assert!(SpacePhase::Failed.is_terminal());
        assert!(!SpacePhase::Provisioning.is_terminal());
    }
}
