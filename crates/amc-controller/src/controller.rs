//! Controller Wiring
//!
//! Owns the observed state (spaces, addresses, plan catalog), translates
//! watch events into queue entries for the affected spaces, and drives a
//! pool of reconcile workers over the per-key serialized queue.

use crate::catalog::PlanCatalog;
use crate::cluster::ClusterClient;
use crate::dispatch::WorkQueue;
use crate::endpoints::EndpointDiscovery;
use crate::reconcile::{BackoffPolicy, ReconcileOutcome, Reconciler};
use crate::synthesis::{Synthesizer, DEFAULT_CA_BUNDLE};
use crate::template::HandlebarsRenderer;
use amc_model::space::annotation;
use amc_model::{
    Address, AddressPlan, AddressSpace, AddressSpacePlan, AuthenticationService, ConsoleService,
    InfraConfig, SpaceKey,
};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Observed change delivered by the watch layer
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Address space created or modified
    SpaceUpserted(AddressSpace),
    /// Address space deleted; infrastructure is torn down
    SpaceDeleted(SpaceKey),
    /// Address created or modified
    AddressUpserted(Address),
    /// Address deleted
    AddressDeleted {
        /// Owning space
        space: SpaceKey,
        /// Address key (namespace/name)
        key: String,
    },
    /// Address space plan created or modified
    SpacePlanUpserted(AddressSpacePlan),
    /// Address plan created or modified
    AddressPlanUpserted(AddressPlan),
    /// Infra config created or modified
    InfraConfigUpserted(InfraConfig),
    /// Authentication service created or its status changed
    AuthServiceUpserted(AuthenticationService),
    /// Console service created or modified
    ConsoleServiceUpserted(ConsoleService),
}

/// Controller tunables
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Reconcile worker count
    pub workers: usize,
    /// Namespace infra objects are created in
    pub infra_namespace: String,
    /// CA bundle consulted when the auth service names no CA secret
    pub ca_bundle: PathBuf,
    /// Retry backoff for transient cluster failures
    pub backoff: BackoffPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            infra_namespace: "amc-infra".to_string(),
            ca_bundle: PathBuf::from(DEFAULT_CA_BUNDLE),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Watch-driven control loop over all address spaces
pub struct Controller {
    catalog: Arc<PlanCatalog>,
    queue: Arc<WorkQueue>,
    reconciler: Reconciler,
    spaces: DashMap<SpaceKey, AddressSpace>,
    addresses: DashMap<SpaceKey, BTreeMap<String, Address>>,
    terminating: DashSet<SpaceKey>,
    config: ControllerConfig,
}

impl Controller {
    /// Controller over the given cluster seam and endpoint discovery
    pub fn new(
        config: ControllerConfig,
        cluster: Arc<dyn ClusterClient>,
        discovery: Arc<dyn EndpointDiscovery>,
    ) -> Arc<Self> {
        let catalog = Arc::new(PlanCatalog::new());
        let synthesizer = Synthesizer::new(
            Arc::new(HandlebarsRenderer::new()),
            cluster.clone(),
            &config.infra_namespace,
            &config.ca_bundle,
        );
        let reconciler = Reconciler::new(
            catalog.clone(),
            cluster,
            synthesizer,
            discovery,
            config.backoff,
        );
        Arc::new(Self {
            catalog,
            queue: WorkQueue::new(),
            reconciler,
            spaces: DashMap::new(),
            addresses: DashMap::new(),
            terminating: DashSet::new(),
            config,
        })
    }

    /// Shared plan catalog, for demos and introspection
    pub fn catalog(&self) -> Arc<PlanCatalog> {
        self.catalog.clone()
    }

    /// Fold one watch event into the observed state and schedule every
    /// space the change can affect.
    pub fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::SpaceUpserted(mut space) => {
                // The infra UUID is assigned exactly once and survives
                // across upserts; every owned object carries it as label.
                if space.infra_uuid().is_none() {
                    let existing = self
                        .spaces
                        .get(&space.key())
                        .and_then(|s| s.infra_uuid().map(|u| u.to_string()));
                    let uuid = existing
                        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
                    space
                        .annotations
                        .insert(annotation::INFRA_UUID.to_string(), uuid);
                }
                let key = space.key();
                self.spaces.insert(key.clone(), space);
                self.queue.enqueue(key);
            }
            WatchEvent::SpaceDeleted(key) => {
                if self.spaces.contains_key(&key) {
                    self.terminating.insert(key.clone());
                    self.queue.enqueue(key);
                }
            }
            WatchEvent::AddressUpserted(address) => {
                let key = SpaceKey::new(&address.namespace, &address.address_space);
                self.addresses
                    .entry(key.clone())
                    .or_default()
                    .insert(address.key(), address);
                self.queue.enqueue(key);
            }
            WatchEvent::AddressDeleted { space, key } => {
                if let Some(mut entry) = self.addresses.get_mut(&space) {
                    entry.remove(&key);
                }
                self.queue.enqueue(space);
            }
            WatchEvent::SpacePlanUpserted(plan) => {
                let name = plan.name.clone();
                self.catalog.update(|s| {
                    s.space_plans.insert(plan.name.clone(), plan);
                });
                self.enqueue_matching(|space| space.plan == name);
            }
            WatchEvent::AddressPlanUpserted(plan) => {
                self.catalog.update(|s| {
                    s.address_plans.insert(plan.name.clone(), plan);
                });
                // Any space may permit the plan; replan them all.
                self.enqueue_matching(|_| true);
            }
            WatchEvent::InfraConfigUpserted(config) => {
                let name = config.name().to_string();
                self.catalog.update(|s| {
                    s.infra_configs.insert(config.name().to_string(), config);
                });
                self.enqueue_matching(|space| space.infra_config.as_deref() == Some(name.as_str()));
                // Spaces defaulting through their plan are also affected.
                let snapshot = self.catalog.load();
                self.enqueue_matching(|space| {
                    space.infra_config.is_none()
                        && snapshot
                            .space_plan(&space.plan)
                            .map(|p| p.infra_config_ref == name)
                            .unwrap_or(false)
                });
            }
            WatchEvent::AuthServiceUpserted(service) => {
                let name = service.name.clone();
                self.catalog.update(|s| {
                    s.auth_services.insert(service.name.clone(), service);
                });
                self.enqueue_matching(|space| space.authentication_service == name);
            }
            WatchEvent::ConsoleServiceUpserted(service) => {
                self.catalog.update(|s| {
                    s.console_services.insert(service.name.clone(), service);
                });
                self.enqueue_matching(|_| true);
            }
        }
    }

    fn enqueue_matching(&self, predicate: impl Fn(&AddressSpace) -> bool) {
        for entry in self.spaces.iter() {
            if predicate(entry.value()) {
                self.queue.enqueue(entry.key().clone());
            }
        }
    }

    /// Spawn the reconcile worker pool. Workers drain the queue until
    /// [`Controller::shutdown`] is called.
    pub fn run(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        info!(workers = self.config.workers, "starting reconcile workers");
        (0..self.config.workers)
            .map(|_| {
                let controller = self.clone();
                tokio::spawn(async move { controller.worker().await })
            })
            .collect()
    }

    /// Stop accepting work; running passes finish, workers then exit
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    async fn worker(self: Arc<Self>) {
        while let Some(key) = self.queue.next().await {
            self.reconcile_key(&key).await;
            self.queue.done(&key);
        }
    }

    /// One pass for one key, folding the result back into observed state.
    async fn reconcile_key(&self, key: &SpaceKey) {
        let Some(mut space) = self.spaces.get(key).map(|s| s.clone()) else {
            return;
        };
        let mut addresses: Vec<Address> = self
            .addresses
            .get(key)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        let terminating = self.terminating.contains(key);

        match self
            .reconciler
            .reconcile(&mut space, &mut addresses, terminating)
            .await
        {
            Ok(ReconcileOutcome::Deleted) => {
                self.spaces.remove(key);
                self.addresses.remove(key);
                self.terminating.remove(key);
            }
            Ok(outcome) => {
                if let Some(mut stored) = self.addresses.get_mut(key) {
                    for address in addresses {
                        stored.insert(address.key(), address);
                    }
                }
                self.spaces.insert(key.clone(), space);
                if let ReconcileOutcome::Failed(message) = outcome {
                    warn!(space = %key, %message, "space failed, waiting for input change");
                }
            }
            Err(e) => {
                // Non-transient cluster failure: surface it and try again
                // after the maximum backoff rather than spinning.
                error!(space = %key, error = %e, "reconcile pass aborted");
                let queue = self.queue.clone();
                let key = key.clone();
                let delay = self.config.backoff.delay(u32::MAX);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(key);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CONSOLE_SERVICE_NAME;
    use crate::cluster::{MemoryCluster, Secret};
    use crate::endpoints::RouteDiscovery;
    use amc_model::{
        AddressSpaceType, AddressType, AuthServiceStatus, CertSpec, EndpointSpec, ResourceType,
        SpacePhase, StandardInfraConfig,
    };
    use std::time::Duration;

    fn seeded_cluster() -> Arc<MemoryCluster> {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.put_secret(Secret::new("auth-ca", &[("tls.crt", "CERTIFICATE")]));
        cluster
    }

    fn controller(cluster: Arc<MemoryCluster>) -> Arc<Controller> {
        let config = ControllerConfig {
            workers: 2,
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
            ..Default::default()
        };
        Controller::new(config, cluster, Arc::new(RouteDiscovery::new("apps.example")))
    }

    fn seed_catalog(controller: &Controller) {
        controller.handle(WatchEvent::SpacePlanUpserted(AddressSpacePlan::new(
            "standard-small",
            AddressSpaceType::Standard,
            &[
                (ResourceType::Broker, 2.0),
                (ResourceType::Router, 2.0),
                (ResourceType::Aggregate, 4.0),
            ],
            &["small-queue"],
            "default-standard",
        )));
        controller.handle(WatchEvent::AddressPlanUpserted(AddressPlan::new(
            "small-queue",
            AddressType::Queue,
            &[(ResourceType::Broker, 1.0)],
        )));
        controller.handle(WatchEvent::InfraConfigUpserted(InfraConfig::Standard(
            StandardInfraConfig {
                name: "default-standard".into(),
                version: "1".into(),
                ..Default::default()
            },
        )));
        let mut auth = AuthenticationService::new("default-auth");
        auth.status = Some(AuthServiceStatus {
            host: "auth.example".into(),
            port: 5671,
            ca_cert_secret: Some("auth-ca".into()),
            client_cert_secret: None,
        });
        controller.handle(WatchEvent::AuthServiceUpserted(auth));
    }

    fn space() -> AddressSpace {
        let mut space = AddressSpace::new(
            "prod",
            "app",
            AddressSpaceType::Standard,
            "standard-small",
            "default-auth",
        );
        space.endpoints = vec![
            EndpointSpec {
                name: "amqps".into(),
                service: "messaging".into(),
                cert: Some(CertSpec { secret_name: "prod-messaging-cert".into() }),
            },
            EndpointSpec {
                name: "https".into(),
                service: "console".into(),
                cert: Some(CertSpec { secret_name: "prod-console-cert".into() }),
            },
        ];
        space
    }

    #[test]
    fn test_infra_uuid_assigned_once_and_kept() {
        let controller = controller(seeded_cluster());
        controller.handle(WatchEvent::SpaceUpserted(space()));
        let key = SpaceKey::new("prod", "app");
        let uuid = controller
            .spaces
            .get(&key)
            .unwrap()
            .infra_uuid()
            .unwrap()
            .to_string();

        // A later upsert without the annotation keeps the original UUID.
        controller.handle(WatchEvent::SpaceUpserted(space()));
        assert_eq!(
            controller.spaces.get(&key).unwrap().infra_uuid().unwrap(),
            uuid
        );
    }

    #[test]
    fn test_catalog_events_schedule_affected_spaces() {
        let controller = controller(seeded_cluster());
        seed_catalog(&controller);
        controller.handle(WatchEvent::SpaceUpserted(space()));
        let taken = controller.queue.pending_len();
        assert_eq!(taken, 1);

        // Auth service for an unrelated name schedules nothing new.
        controller.handle(WatchEvent::AuthServiceUpserted(AuthenticationService::new(
            "other-auth",
        )));
        assert_eq!(controller.queue.pending_len(), 1);

        // Plan the space uses requeues it (coalesced with the pending entry).
        controller.handle(WatchEvent::SpacePlanUpserted(AddressSpacePlan::new(
            "standard-small",
            AddressSpaceType::Standard,
            &[(ResourceType::Broker, 1.0)],
            &["small-queue"],
            "default-standard",
        )));
        assert_eq!(controller.queue.pending_len(), 1);
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[tokio::test]
    async fn test_end_to_end_space_becomes_ready() {
        init_tracing();
        let cluster = seeded_cluster();
        let controller = controller(cluster.clone());
        seed_catalog(&controller);
        controller.handle(WatchEvent::SpaceUpserted(space()));
        controller.handle(WatchEvent::AddressUpserted(Address::new(
            "prod",
            "orders",
            "app",
            "small-queue",
        )));

        let workers = controller.run();
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.shutdown();
        for worker in workers {
            worker.await.unwrap();
        }

        let status = cluster.space_status("prod/app").unwrap();
        // Missing console service degrades the console only.
        assert_eq!(status.phase, SpacePhase::Ready);
        assert!(status.ready);
        assert!(status.endpoint_hosts.contains_key("messaging"));
        assert!(cluster.object_count() >= 5);
        assert!(cluster.address_status("prod/orders").unwrap().ready);
    }

    #[tokio::test]
    async fn test_space_deletion_tears_down_and_forgets() {
        let cluster = seeded_cluster();
        cluster.put_secret(Secret::new(
            "console-oauth",
            &[("client-id", "console"), ("client-secret", "s3cret")],
        ));
        let controller = controller(cluster.clone());
        seed_catalog(&controller);
        let mut console = ConsoleService::new(CONSOLE_SERVICE_NAME);
        console.oauth_client_secret = Some("console-oauth".into());
        controller.handle(WatchEvent::ConsoleServiceUpserted(console));
        controller.handle(WatchEvent::SpaceUpserted(space()));

        let key = SpaceKey::new("prod", "app");
        controller.reconcile_key(&key).await;
        controller.queue.done(&key);
        assert!(cluster.object_count() > 0);
        assert_eq!(cluster.space_status("prod/app").unwrap().phase, SpacePhase::Ready);

        controller.handle(WatchEvent::SpaceDeleted(key.clone()));
        controller.reconcile_key(&key).await;
        assert_eq!(cluster.object_count(), 0);
        assert!(!controller.spaces.contains_key(&key));
        assert!(!controller.terminating.contains(&key));
    }
}
