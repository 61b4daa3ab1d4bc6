//! Admission Allocator - Quota Accounting
//!
//! Full replan on every call: totals are recomputed from nothing so the
//! same input set always yields the same admission set, even after missed
//! watch events. Addresses are processed in stable lexicographic
//! (namespace, name) order; when quota runs out the first-come addresses
//! in that order keep their admission.

use crate::catalog::Snapshot;
use amc_model::{Address, AddressSpacePlan, ResourceType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance for f64 credit accumulation error
const CREDIT_EPSILON: f64 = 1e-9;

/// Why an address was not admitted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RejectReason {
    /// Plan does not resolve, or is not permitted by the space plan
    UnknownPlan(String),
    /// Admitting the address would exceed the allowance for this type
    QuotaExceeded(ResourceType),
}

impl RejectReason {
    /// Machine-readable reason string for status conditions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownPlan(_) => "UnknownPlan",
            Self::QuotaExceeded(_) => "QuotaExceeded",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPlan(plan) => write!(f, "unknown address plan '{plan}'"),
            Self::QuotaExceeded(resource) => write!(f, "quota exceeded for resource {resource}"),
        }
    }
}

/// Per-address admission outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Verdict {
    /// Admitted with the committed credit map
    Admitted {
        /// Credits committed against the space's allowances
        credits: BTreeMap<ResourceType, f64>,
    },
    /// Rejected; contributes no credit
    Rejected {
        /// Why
        reason: RejectReason,
        /// Status message surfaced on the address
        message: String,
    },
}

impl Verdict {
    /// Whether the address was admitted
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Outcome of one full replan over a space's declared addresses
#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    /// Verdict per address key (namespace/name)
    pub verdicts: BTreeMap<String, Verdict>,
    /// Committed credit totals per resource type
    pub usage: BTreeMap<ResourceType, f64>,
    /// Committed aggregate total
    pub aggregate_usage: f64,
}

impl AllocationResult {
    /// Verdict for one address
    pub fn verdict(&self, key: &str) -> Option<&Verdict> {
        self.verdicts.get(key)
    }

    /// Whether an address was admitted
    pub fn is_admitted(&self, key: &str) -> bool {
        self.verdicts.get(key).map(Verdict::is_admitted).unwrap_or(false)
    }

    /// Keys of admitted addresses, in stable order
    pub fn admitted(&self) -> impl Iterator<Item = &str> {
        self.verdicts
            .iter()
            .filter(|(_, v)| v.is_admitted())
            .map(|(k, _)| k.as_str())
    }

    /// Whether any address was rejected for quota (space degrades but
    /// keeps serving)
    pub fn any_quota_rejected(&self) -> bool {
        self.verdicts.values().any(|v| {
            matches!(
                v,
                Verdict::Rejected {
                    reason: RejectReason::QuotaExceeded(_),
                    ..
                }
            )
        })
    }

    /// Committed broker credit for one admitted address
    pub fn committed_credit(&self, key: &str, resource: ResourceType) -> f64 {
        match self.verdicts.get(key) {
            Some(Verdict::Admitted { credits }) => credits.get(&resource).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

/// Evaluate admission for the full set of addresses declared in a space.
///
/// No incremental ledger: totals start at zero on every call. Addresses
/// whose plan does not resolve (or is not in the space plan's permitted
/// set) are rejected first and never contribute credit; the remainder are
/// folded in (namespace, name) order against the plan's allowances.
pub fn evaluate(
    plan: &AddressSpacePlan,
    addresses: &[Address],
    snapshot: &Snapshot,
) -> AllocationResult {
    let mut result = AllocationResult::default();

    let mut ordered: Vec<&Address> = addresses.iter().collect();
    ordered.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

    let aggregate_allowance = plan.allowance(ResourceType::Aggregate);

    for address in ordered {
        let address_plan = match snapshot.address_plan(&address.plan) {
            Some(p) if plan.permits(&p.name) => p,
            _ => {
                result.verdicts.insert(
                    address.key(),
                    Verdict::Rejected {
                        reason: RejectReason::UnknownPlan(address.plan.clone()),
                        message: format!("Unknown address plan '{}'", address.plan),
                    },
                );
                continue;
            }
        };

        let mut exceeded: Option<ResourceType> = None;
        for resource in ResourceType::concrete() {
            let credit = address_plan.credit(resource);
            if credit <= 0.0 {
                continue;
            }
            let total = result.usage.get(&resource).copied().unwrap_or(0.0) + credit;
            if total > plan.allowance(resource) + CREDIT_EPSILON {
                exceeded = Some(resource);
                break;
            }
        }
        if exceeded.is_none()
            && result.aggregate_usage + address_plan.total_credit()
                > aggregate_allowance + CREDIT_EPSILON
        {
            exceeded = Some(ResourceType::Aggregate);
        }

        if let Some(resource) = exceeded {
            result.verdicts.insert(
                address.key(),
                Verdict::Rejected {
                    reason: RejectReason::QuotaExceeded(resource),
                    message: format!(
                        "Quota exceeded for resource {} on plan '{}'",
                        resource, plan.name
                    ),
                },
            );
            continue;
        }

        let mut credits = BTreeMap::new();
        for resource in ResourceType::concrete() {
            let credit = address_plan.credit(resource);
            if credit > 0.0 {
                *result.usage.entry(resource).or_insert(0.0) += credit;
                credits.insert(resource, credit);
            }
        }
        result.aggregate_usage += address_plan.total_credit();
        result
            .verdicts
            .insert(address.key(), Verdict::Admitted { credits });
    }

    result
}
