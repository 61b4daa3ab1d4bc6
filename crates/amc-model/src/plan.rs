//! Capacity Plan Data Model

use crate::address::AddressType;
use crate::space::AddressSpaceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resource type accounted by the admission allocator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Broker-backed capacity (queues, durable subscriptions)
    Broker,
    /// Router link capacity (anycast, multicast, topic fan-out)
    Router,
    /// Pseudo type capping the sum of credits across all other types
    Aggregate,
}

impl ResourceType {
    /// Concrete (non-aggregate) resource types
    pub fn concrete() -> [ResourceType; 2] {
        [ResourceType::Broker, ResourceType::Router]
    }

    /// String form used in plan definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Router => "router",
            Self::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan selected by a single address: the credits it consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressPlan {
    /// Plan name
    pub name: String,
    /// Address type this plan applies to
    pub address_type: AddressType,
    /// Credit consumed per resource type by one address of this plan
    pub resources: BTreeMap<ResourceType, f64>,
}

impl AddressPlan {
    /// Create a plan with the given credits
    pub fn new(name: &str, address_type: AddressType, resources: &[(ResourceType, f64)]) -> Self {
        Self {
            name: name.to_string(),
            address_type,
            resources: resources.iter().copied().collect(),
        }
    }

    /// Credit for a single resource type (0 when the plan declares none)
    pub fn credit(&self, resource_type: ResourceType) -> f64 {
        self.resources.get(&resource_type).copied().unwrap_or(0.0)
    }

    /// Sum of credits across all concrete resource types
    pub fn total_credit(&self) -> f64 {
        self.resources
            .iter()
            .filter(|(t, _)| **t != ResourceType::Aggregate)
            .map(|(_, c)| c)
            .sum()
    }
}

/// Plan selected by an address space: allowances per resource type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpacePlan {
    /// Plan name
    pub name: String,
    /// Address space type this plan applies to
    pub space_type: AddressSpaceType,
    /// Ceiling on total credit per resource type across the space
    pub resources: BTreeMap<ResourceType, f64>,
    /// Address plans permitted within this space plan
    pub address_plans: Vec<String>,
    /// Infrastructure configuration used when the space does not name one
    pub infra_config_ref: String,
}

impl AddressSpacePlan {
    /// Create a space plan with the given allowances
    pub fn new(
        name: &str,
        space_type: AddressSpaceType,
        resources: &[(ResourceType, f64)],
        address_plans: &[&str],
        infra_config_ref: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            space_type,
            resources: resources.iter().copied().collect(),
            address_plans: address_plans.iter().map(|p| p.to_string()).collect(),
            infra_config_ref: infra_config_ref.to_string(),
        }
    }

    /// Allowance for a resource type (0 when the plan declares none)
    pub fn allowance(&self, resource_type: ResourceType) -> f64 {
        self.resources.get(&resource_type).copied().unwrap_or(0.0)
    }

    /// Whether an address plan is a member of the permitted set
    pub fn permits(&self, address_plan: &str) -> bool {
        self.address_plans.iter().any(|p| p == address_plan)
    }
}
