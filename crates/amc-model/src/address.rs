//! Address Data Model

use crate::condition::{set_condition, Condition, ConditionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routable destination type within an address space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    /// Store-and-forward queue
    Queue,
    /// Publish/subscribe topic
    Topic,
    /// Durable subscription on a topic
    Subscription,
    /// Direct anycast routing
    Anycast,
    /// Direct multicast routing
    Multicast,
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::Subscription => "subscription",
            Self::Anycast => "anycast",
            Self::Multicast => "multicast",
        };
        f.write_str(s)
    }
}

/// A single messaging destination declared by a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    /// Address name
    pub name: String,
    /// Namespace the address was declared in
    pub namespace: String,
    /// Parent address space name
    pub address_space: String,
    /// Selected address plan name
    pub plan: String,
    /// Current status, written only by the reconcile loop
    pub status: AddressStatus,
}

impl Address {
    /// Create an address with an empty (pending) status
    pub fn new(namespace: &str, name: &str, address_space: &str, plan: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            address_space: address_space.to_string(),
            plan: plan.to_string(),
            status: AddressStatus::default(),
        }
    }

    /// Stable identity used for ordering and status bookkeeping
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Address status: ready flag plus condition list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressStatus {
    /// Whether the address is admitted and served
    pub ready: bool,
    /// Human-readable messages describing why the address is not ready
    pub messages: Vec<String>,
    /// Condition list
    pub conditions: Vec<Condition>,
}

impl AddressStatus {
    /// Mark the address admitted
    pub fn mark_ready(&mut self) {
        self.ready = true;
        self.messages.clear();
        set_condition(&mut self.conditions, Condition::ok("Ready"));
    }

    /// Mark the address rejected with a reason and message
    pub fn mark_not_ready(&mut self, reason: &str, message: &str) {
        self.ready = false;
        self.messages = vec![message.to_string()];
        set_condition(
            &mut self.conditions,
            Condition::failed("Ready", reason, message),
        );
    }

    /// Whether the Ready condition is currently false
    pub fn is_not_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == ConditionStatus::False)
    }
}
