//! Capacity Projector - Credit Share to Concrete Parameters
//!
//! Converts an admitted credit share into concrete numeric infrastructure
//! parameters: `concrete = global * credit`, truncated toward zero. Pure
//! function of its inputs; a change to either the global pool (infra
//! config) or the credit (plan) yields a new projection without address
//! recreation.

use crate::admission::AllocationResult;
use amc_model::ResourceType;
use serde::{Deserialize, Serialize};

/// Project a global capacity value onto one credit share.
///
/// Fractional byte results truncate (1 MiB at credit 0.7 is 734003, not
/// 734004). Credits that are NaN or negative project to zero; products
/// beyond the integer range saturate.
pub fn project(global: u64, credit: f64) -> u64 {
    if !credit.is_finite() || credit <= 0.0 {
        return 0;
    }
    let product = global as f64 * credit;
    if product >= u64::MAX as f64 {
        u64::MAX
    } else {
        product as u64
    }
}

/// Per-address broker settings derived from the global max size
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressSettings {
    /// Address key (namespace/name)
    pub address: String,
    /// Maximum bytes this address may occupy in the broker pool
    pub max_size_bytes: u64,
}

/// Derive broker address settings for every admitted address with a
/// broker credit. Addresses without broker credit need no settings.
pub fn broker_address_settings(
    allocation: &AllocationResult,
    global_max_size: u64,
) -> Vec<AddressSettings> {
    let mut settings = Vec::new();
    for key in allocation.admitted() {
        let credit = allocation.committed_credit(key, ResourceType::Broker);
        if credit > 0.0 {
            settings.push(AddressSettings {
                address: key.to_string(),
                max_size_bytes: project(global_max_size, credit),
            });
        }
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Verdict;
    use std::collections::BTreeMap;

    const ONE_MIB: u64 = 1_048_576;

    #[test]
    fn test_projection_truncates() {
        assert_eq!(project(ONE_MIB, 0.5), 524_288);
        assert_eq!(project(ONE_MIB, 0.7), 734_003);
        assert_eq!(project(ONE_MIB, 0.9), 943_718);
    }

    #[test]
    fn test_projection_edge_values() {
        assert_eq!(project(ONE_MIB, 0.0), 0);
        assert_eq!(project(ONE_MIB, -1.0), 0);
        assert_eq!(project(ONE_MIB, f64::NAN), 0);
        assert_eq!(project(ONE_MIB, 1.0), ONE_MIB);
        assert_eq!(project(u64::MAX, 2.0), u64::MAX);
    }

    #[test]
    fn test_settings_only_for_broker_credits() {
        let mut allocation = AllocationResult::default();
        let mut broker_credits = BTreeMap::new();
        broker_credits.insert(ResourceType::Broker, 0.5);
        allocation
            .verdicts
            .insert("app/queue".into(), Verdict::Admitted { credits: broker_credits });

        let mut router_credits = BTreeMap::new();
        router_credits.insert(ResourceType::Router, 0.5);
        allocation
            .verdicts
            .insert("app/anycast".into(), Verdict::Admitted { credits: router_credits });

        let settings = broker_address_settings(&allocation, ONE_MIB);
        assert_eq!(
            settings,
            vec![AddressSettings {
                address: "app/queue".into(),
                max_size_bytes: 524_288,
            }]
        );
    }
}
