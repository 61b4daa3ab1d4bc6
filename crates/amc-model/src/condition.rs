//! Status Conditions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition truth value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    Unknown,
}

/// A single status condition attached to an address or address space
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Condition kind, e.g. "Ready", "DependencyReady", "ConsoleOAuth"
    pub kind: String,
    /// Truth value
    pub status: ConditionStatus,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// When the status last changed
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    /// Create a condition with the current timestamp
    pub fn new(kind: &str, status: ConditionStatus, reason: &str, message: &str) -> Self {
        Self {
            kind: kind.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition: Utc::now(),
        }
    }

    /// Convenience constructor for a true condition
    pub fn ok(kind: &str) -> Self {
        Self::new(kind, ConditionStatus::True, "", "")
    }

    /// Convenience constructor for a false condition
    pub fn failed(kind: &str, reason: &str, message: &str) -> Self {
        Self::new(kind, ConditionStatus::False, reason, message)
    }
}

/// Replace the condition of the same kind, preserving the transition
/// timestamp when the status value did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == condition.kind) {
        let transition = if existing.status == condition.status {
            existing.last_transition
        } else {
            condition.last_transition
        };
        *existing = Condition {
            last_transition: transition,
            ..condition
        };
    } else {
        conditions.push(condition);
    }
}
