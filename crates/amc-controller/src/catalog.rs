//! Plan Catalog - Immutable-per-Revision Lookup
//!
//! The latest observed snapshot of plan and dependency objects. A snapshot
//! is read-only during a reconcile pass and swapped atomically between
//! passes; staleness is bounded by watch propagation.

use amc_model::{
    AddressPlan, AddressSpace, AddressSpacePlan, AuthenticationService, ConsoleService, InfraConfig,
};
use arc_swap::ArcSwap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Well-known name of the console service consulted for OAuth wiring
pub const CONSOLE_SERVICE_NAME: &str = "console";

/// One immutable revision of every operator-managed lookup object
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Address space plans by name
    pub space_plans: BTreeMap<String, AddressSpacePlan>,
    /// Address plans by name
    pub address_plans: BTreeMap<String, AddressPlan>,
    /// Infra configs by name
    pub infra_configs: BTreeMap<String, InfraConfig>,
    /// Authentication services by name
    pub auth_services: BTreeMap<String, AuthenticationService>,
    /// Console services by name
    pub console_services: BTreeMap<String, ConsoleService>,
}

impl Snapshot {
    /// Empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an address space plan
    pub fn space_plan(&self, name: &str) -> Option<&AddressSpacePlan> {
        self.space_plans.get(name)
    }

    /// Resolve an address plan
    pub fn address_plan(&self, name: &str) -> Option<&AddressPlan> {
        self.address_plans.get(name)
    }

    /// Resolve the infra config for a space: the space's own selection
    /// when present, otherwise the plan's default reference.
    pub fn infra_config_for(
        &self,
        space: &AddressSpace,
        plan: &AddressSpacePlan,
    ) -> Option<&InfraConfig> {
        let name = space
            .infra_config
            .as_deref()
            .unwrap_or(plan.infra_config_ref.as_str());
        self.infra_configs.get(name)
    }

    /// Resolve an authentication service
    pub fn auth_service(&self, name: &str) -> Option<&AuthenticationService> {
        self.auth_services.get(name)
    }

    /// Resolve the well-known console service, when deployed
    pub fn console_service(&self) -> Option<&ConsoleService> {
        self.console_services.get(CONSOLE_SERVICE_NAME)
    }
}

/// Atomically swapped snapshot holder shared across reconcile workers
pub struct PlanCatalog {
    snapshot: ArcSwap<Snapshot>,
}

impl PlanCatalog {
    /// Catalog starting from an empty snapshot
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    /// Current snapshot; the returned Arc stays consistent for the caller
    /// even if the catalog is swapped mid-pass.
    pub fn load(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Replace the snapshot wholesale
    pub fn store(&self, snapshot: Snapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Clone-modify-swap update used by the watch event handlers
    pub fn update(&self, mutate: impl FnOnce(&mut Snapshot)) {
        let mut next = (*self.load()).clone();
        mutate(&mut next);
        self.store(next);
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}
