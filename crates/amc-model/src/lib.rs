//! OpenAMC Model - Shared types for the messaging control plane
//!
//! This crate defines the declarative data model consumed by the
//! controller:
//! - Address spaces and addresses (tenant-declared desired state)
//! - Capacity plans (allowances at the space level, credits per address)
//! - Infrastructure configuration (broker/router/admin sizing)
//! - Auth and console service descriptors
//! - Synthesized infra objects and resource-set diffing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          TENANT INPUT                           │
//! │   ┌──────────────┐        ┌─────────┐  ┌─────────┐             │
//! │   │ AddressSpace │───────▶│ Address │  │ Address │  ...        │
//! │   └──────┬───────┘        └────┬────┘  └────┬────┘             │
//! └──────────┼─────────────────────┼────────────┼──────────────────┘
//!            │ plan                │ plan       │ plan
//! ┌──────────▼─────────────────────▼────────────▼──────────────────┐
//! │                        OPERATOR INPUT                           │
//! │  ┌──────────────────┐  ┌─────────────┐  ┌─────────────┐        │
//! │  │ AddressSpacePlan │  │ AddressPlan │  │ InfraConfig │        │
//! │  │   (allowances)   │  │  (credits)  │  │  (sizing)   │        │
//! │  └──────────────────┘  └─────────────┘  └─────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod address;
pub mod condition;
pub mod infra;
pub mod plan;
pub mod resource;
pub mod service;
pub mod space;

pub use address::{Address, AddressStatus, AddressType};
pub use condition::{Condition, ConditionStatus};
pub use infra::{BrokeredInfraConfig, InfraConfig, PodTemplateOverride, StandardInfraConfig};
pub use plan::{AddressPlan, AddressSpacePlan, ResourceType};
pub use resource::{InfraObject, ObjectMeta, ResourceDiff, ResourceKey, ResourceSet};
pub use service::{AuthServiceStatus, AuthenticationService, ConsoleService};
pub use space::{
    AddressSpace, AddressSpaceStatus, AddressSpaceType, CertSpec, EndpointSpec, SpaceKey,
    SpacePhase,
};
