//! Reconcile Loop Worker
//!
//! One pass takes an address space and its declared addresses, replans
//! admission from zero, synthesizes the desired manifest set, diffs it
//! against what the cluster currently owns for the space, and applies the
//! difference. The pass is the only writer of address and space status.

use crate::admission::{evaluate, Verdict};
use crate::catalog::PlanCatalog;
use crate::cluster::{ClusterClient, ClusterError};
use crate::endpoints::EndpointDiscovery;
use crate::synthesis::Synthesizer;
use amc_model::condition::{set_condition, Condition};
use amc_model::{Address, AddressSpace, InfraObject, SpacePhase};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Capped exponential backoff between transient-failure retries
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Backoff starting at `initial`, doubling up to `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let shifted = self
            .initial
            .saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
        shifted.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Result of one reconcile pass
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Desired state applied, every address admitted
    Ready,
    /// Serving, but some addresses were rejected for quota
    Degraded,
    /// Waiting on a dependency; re-run on its next watch event
    Blocked(String),
    /// Fatal configuration error, operator intervention required
    Failed(String),
    /// Teardown complete
    Deleted,
}

/// Reconciles one address space at a time
pub struct Reconciler {
    catalog: Arc<PlanCatalog>,
    cluster: Arc<dyn ClusterClient>,
    synthesizer: Synthesizer,
    discovery: Arc<dyn EndpointDiscovery>,
    backoff: BackoffPolicy,
    max_attempts: u32,
}

impl Reconciler {
    /// Reconciler over the given catalog, cluster seam and discovery
    pub fn new(
        catalog: Arc<PlanCatalog>,
        cluster: Arc<dyn ClusterClient>,
        synthesizer: Synthesizer,
        discovery: Arc<dyn EndpointDiscovery>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            catalog,
            cluster,
            synthesizer,
            discovery,
            backoff,
            max_attempts: 5,
        }
    }

    /// Run one full pass for a space.
    ///
    /// Status on the space and its addresses is written here and nowhere
    /// else. `Err` carries only non-transient cluster failures; transient
    /// ones are retried inline with backoff.
    pub async fn reconcile(
        &self,
        space: &mut AddressSpace,
        addresses: &mut [Address],
        terminating: bool,
    ) -> Result<ReconcileOutcome, ClusterError> {
        if terminating {
            return self.teardown(space).await;
        }

        let snapshot = self.catalog.load();

        let Some(plan) = snapshot.space_plan(&space.plan).cloned() else {
            return self
                .fail(space, "PlanResolved", &format!("unknown address space plan '{}'", space.plan))
                .await;
        };

        // Full replan: admission state is recomputed from zero each pass.
        let allocation = evaluate(&plan, addresses, &snapshot);
        for address in addresses.iter_mut() {
            match allocation.verdict(&address.key()) {
                Some(Verdict::Admitted { .. }) | None => address.status.mark_ready(),
                Some(Verdict::Rejected { reason, message }) => {
                    address.status.mark_not_ready(reason.as_str(), message)
                }
            }
            self.cluster.update_address_status(address).await?;
        }

        let Some(infra) = snapshot.infra_config_for(space, &plan).cloned() else {
            let name = space
                .infra_config
                .clone()
                .unwrap_or_else(|| plan.infra_config_ref.clone());
            return self
                .fail(space, "InfraConfigResolved", &format!("unknown infra config '{name}'"))
                .await;
        };

        let Some(auth) = snapshot.auth_service(&space.authentication_service).cloned() else {
            return self
                .block(
                    space,
                    &format!(
                        "authentication service '{}' not found",
                        space.authentication_service
                    ),
                )
                .await;
        };
        let console = snapshot.console_service().cloned();

        let outcome = match self
            .synthesizer
            .synthesize(space, &infra, &allocation, &auth, console.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => return self.block(space, &e.to_string()).await,
            Err(e) => return self.fail(space, "Synthesized", &e.to_string()).await,
        };

        let infra_uuid = match space.infra_uuid() {
            Some(uuid) => uuid.to_string(),
            None => return self.fail(space, "Synthesized", "no infra uuid assigned").await,
        };

        let live = self.cluster.list_owned(&infra_uuid).await?;
        let diff = outcome.resources.diff(&live);
        debug!(
            space = %space.key(),
            creates = diff.creates.len(),
            updates = diff.updates.len(),
            deletes = diff.deletes.len(),
            "applying resource diff"
        );

        for object in diff.creates.iter().chain(diff.updates.iter()) {
            self.apply_with_retry(object).await?;
        }
        for key in &diff.deletes {
            self.cluster.delete(key).await?;
        }

        space.status.endpoint_hosts.clear();
        for endpoint in &space.endpoints {
            if let Some(host) = self.discovery.external_host(space, &endpoint.service) {
                space.status.endpoint_hosts.insert(endpoint.service.clone(), host);
            }
        }

        set_condition(&mut space.status.conditions, Condition::ok("PlanResolved"));
        set_condition(&mut space.status.conditions, Condition::ok("InfraConfigResolved"));
        set_condition(&mut space.status.conditions, Condition::ok("DependencyReady"));
        set_condition(&mut space.status.conditions, Condition::ok("Synthesized"));
        if let Some(warning) = outcome.warnings.first() {
            warn!(space = %space.key(), %warning, "console wiring degraded");
            set_condition(
                &mut space.status.conditions,
                Condition::failed("ConsoleReady", "ConsoleUnavailable", warning),
            );
        } else {
            set_condition(&mut space.status.conditions, Condition::ok("ConsoleReady"));
        }

        // Console wiring is best-effort: warnings surface on the
        // ConsoleReady condition only. Degraded is reserved for quota
        // rejection.
        let degraded = allocation.any_quota_rejected();
        space.status.phase = if degraded { SpacePhase::Degraded } else { SpacePhase::Ready };
        space.status.ready = true;
        self.cluster.update_space_status(space).await?;
        info!(space = %space.key(), phase = ?space.status.phase, "reconcile pass complete");

        Ok(if degraded {
            ReconcileOutcome::Degraded
        } else {
            ReconcileOutcome::Ready
        })
    }

    /// Delete every infra object owned by the space, then mark it deleted.
    async fn teardown(&self, space: &mut AddressSpace) -> Result<ReconcileOutcome, ClusterError> {
        space.status.phase = SpacePhase::Terminating;
        space.status.ready = false;
        self.cluster.update_space_status(space).await?;

        if let Some(uuid) = space.infra_uuid() {
            let owned = self.cluster.list_owned(uuid).await?;
            for key in owned.keys() {
                self.cluster.delete(key).await?;
            }
            info!(space = %space.key(), objects = owned.len(), "infrastructure torn down");
        }
        space.status.phase = SpacePhase::Deleted;
        self.cluster.update_space_status(space).await?;
        Ok(ReconcileOutcome::Deleted)
    }

    /// Dependency wait: NotReady condition, retried on the next event.
    async fn block(
        &self,
        space: &mut AddressSpace,
        message: &str,
    ) -> Result<ReconcileOutcome, ClusterError> {
        set_condition(
            &mut space.status.conditions,
            Condition::failed("DependencyReady", "NotReady", message),
        );
        // A space that was serving keeps its infrastructure but stops
        // being Ready until the dependency comes back.
        space.status.phase = if space.status.phase.is_serving() {
            SpacePhase::Degraded
        } else {
            SpacePhase::Provisioning
        };
        space.status.ready = false;
        self.cluster.update_space_status(space).await?;
        debug!(space = %space.key(), message, "reconcile blocked on dependency");
        Ok(ReconcileOutcome::Blocked(message.to_string()))
    }

    /// Fatal configuration error: Failed phase until the inputs change.
    async fn fail(
        &self,
        space: &mut AddressSpace,
        condition: &str,
        message: &str,
    ) -> Result<ReconcileOutcome, ClusterError> {
        set_condition(
            &mut space.status.conditions,
            Condition::failed(condition, "ConfigurationError", message),
        );
        space.status.phase = SpacePhase::Failed;
        space.status.ready = false;
        self.cluster.update_space_status(space).await?;
        warn!(space = %space.key(), message, "reconcile failed");
        Ok(ReconcileOutcome::Failed(message.to_string()))
    }

    /// Apply with capped-backoff retry on transient store failures. The
    /// admission and synthesis results are not recomputed across retries.
    async fn apply_with_retry(&self, object: &InfraObject) -> Result<(), ClusterError> {
        let mut attempt = 0u32;
        loop {
            match self.cluster.apply(object).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(key = %object.key(), attempt, error = %e, "transient apply failure");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Snapshot, CONSOLE_SERVICE_NAME};
    use crate::cluster::{MemoryCluster, Secret};
    use crate::template::HandlebarsRenderer;
    use amc_model::{
        AddressPlan, AddressSpacePlan, AddressSpaceType, AddressType, AuthServiceStatus,
        AuthenticationService, CertSpec, ConditionStatus, ConsoleService, EndpointSpec,
        InfraConfig, ResourceType, StandardInfraConfig,
    };
    use amc_model::space::annotation;
    use crate::endpoints::RouteDiscovery;
    use std::path::Path;

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.space_plans.insert(
            "standard-small".into(),
            AddressSpacePlan::new(
                "standard-small",
                AddressSpaceType::Standard,
                &[
                    (ResourceType::Broker, 2.0),
                    (ResourceType::Router, 2.0),
                    (ResourceType::Aggregate, 4.0),
                ],
                &["small-queue", "small-anycast"],
                "default-standard",
            ),
        );
        snapshot.address_plans.insert(
            "small-queue".into(),
            AddressPlan::new("small-queue", AddressType::Queue, &[(ResourceType::Broker, 1.0)]),
        );
        snapshot.address_plans.insert(
            "small-anycast".into(),
            AddressPlan::new(
                "small-anycast",
                AddressType::Anycast,
                &[(ResourceType::Router, 0.5)],
            ),
        );
        snapshot.infra_configs.insert(
            "default-standard".into(),
            InfraConfig::Standard(StandardInfraConfig {
                name: "default-standard".into(),
                version: "1".into(),
                ..Default::default()
            }),
        );
        let mut auth = AuthenticationService::new("default-auth");
        auth.status = Some(AuthServiceStatus {
            host: "auth.example".into(),
            port: 5671,
            ca_cert_secret: Some("auth-ca".into()),
            client_cert_secret: None,
        });
        snapshot.auth_services.insert("default-auth".into(), auth);
        let mut console = ConsoleService::new(CONSOLE_SERVICE_NAME);
        console.oauth_client_secret = Some("console-oauth".into());
        snapshot
            .console_services
            .insert(CONSOLE_SERVICE_NAME.into(), console);
        snapshot
    }

    fn space() -> AddressSpace {
        let mut space = AddressSpace::new(
            "prod",
            "app",
            AddressSpaceType::Standard,
            "standard-small",
            "default-auth",
        );
        space
            .annotations
            .insert(annotation::INFRA_UUID.into(), "1234".into());
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

    fn harness() -> (Reconciler, Arc<MemoryCluster>, Arc<PlanCatalog>) {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.put_secret(Secret::new("auth-ca", &[("tls.crt", "CERTIFICATE")]));
        cluster.put_secret(Secret::new(
            "console-oauth",
            &[("client-id", "console"), ("client-secret", "s3cret")],
        ));
        let catalog = Arc::new(PlanCatalog::new());
        catalog.store(snapshot());
        let synthesizer = Synthesizer::new(
            Arc::new(HandlebarsRenderer::new()),
            cluster.clone(),
            "amc-infra",
            Path::new("/nonexistent/ca-bundle.crt"),
        );
        let reconciler = Reconciler::new(
            catalog.clone(),
            cluster.clone(),
            synthesizer,
            Arc::new(RouteDiscovery::new("apps.cluster.example")),
            BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
        );
        (reconciler, cluster, catalog)
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (reconciler, cluster, _) = harness();
        let mut space = space();
        let mut addresses = vec![Address::new("prod", "orders", "app", "small-queue")];

        let outcome = reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);
        let applied = cluster.apply_count();
        assert!(applied > 0);

        // Unchanged inputs produce an empty diff: no further apply calls.
        let outcome = reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);
        assert_eq!(cluster.apply_count(), applied);
        assert_eq!(cluster.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_swap_flips_verdicts_next_pass() {
        let (reconciler, cluster, catalog) = harness();
        let mut space = space();
        let mut addresses = vec![
            Address::new("prod", "a-orders", "app", "small-queue"),
            Address::new("prod", "b-audit", "app", "small-queue"),
        ];

        reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert!(cluster.address_status("prod/b-audit").unwrap().ready);

        // Shrink the broker allowance below the committed total.
        catalog.update(|s| {
            s.space_plans.insert(
                "standard-small".into(),
                AddressSpacePlan::new(
                    "standard-small",
                    AddressSpaceType::Standard,
                    &[
                        (ResourceType::Broker, 1.0),
                        (ResourceType::Router, 2.0),
                        (ResourceType::Aggregate, 4.0),
                    ],
                    &["small-queue", "small-anycast"],
                    "default-standard",
                ),
            );
        });

        let outcome = reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Degraded);
        assert!(cluster.address_status("prod/a-orders").unwrap().ready);
        assert!(!cluster.address_status("prod/b-audit").unwrap().ready);
        assert_eq!(
            cluster.space_status("prod/app").unwrap().phase,
            SpacePhase::Degraded
        );
        // The rejected address is evicted from the admitted set only; no
        // infrastructure is deleted.
        assert_eq!(cluster.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_console_degradation_keeps_space_ready() {
        let (reconciler, cluster, catalog) = harness();
        catalog.update(|s| {
            s.console_services.clear();
        });
        let mut space = space();

        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);

        // The warning lands on the ConsoleReady condition only.
        let status = cluster.space_status("prod/app").unwrap();
        assert_eq!(status.phase, SpacePhase::Ready);
        assert!(status.ready);
        let console = status
            .conditions
            .iter()
            .find(|c| c.kind == "ConsoleReady")
            .unwrap();
        assert_eq!(console.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn test_serving_space_losing_auth_status_stops_being_ready() {
        let (reconciler, cluster, catalog) = harness();
        let mut space = space();
        reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(cluster.space_status("prod/app").unwrap().ready);

        // Auth service loses its status; infrastructure stays up but the
        // space is no longer Ready.
        catalog.update(|s| {
            s.auth_services.insert(
                "default-auth".into(),
                AuthenticationService::new("default-auth"),
            );
        });
        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Blocked(_)));
        let status = cluster.space_status("prod/app").unwrap();
        assert_eq!(status.phase, SpacePhase::Degraded);
        assert!(!status.ready);
        assert!(cluster.object_count() > 0);
    }

    #[tokio::test]
    async fn test_no_objects_until_auth_status_appears() {
        let (reconciler, cluster, catalog) = harness();
        catalog.update(|s| {
            s.auth_services
                .insert("default-auth".into(), AuthenticationService::new("default-auth"));
        });
        let mut space = space();

        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Blocked(_)));
        assert_eq!(cluster.object_count(), 0);

        // Status arrives; the next pass deploys the full set.
        catalog.store(snapshot());
        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);
        assert_eq!(cluster.object_count(), 5);
    }

    #[tokio::test]
    async fn test_disabling_mqtt_garbage_collects_overlay() {
        let (reconciler, cluster, _) = harness();
        let mut space = space();
        space
            .annotations
            .insert(annotation::WITH_MQTT.into(), "true".into());
        space.endpoints.push(EndpointSpec {
            name: "mqtt".into(),
            service: "mqtt".into(),
            cert: Some(CertSpec { secret_name: "prod-mqtt-cert".into() }),
        });
        let mut addresses = Vec::new();

        reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(cluster.object_count(), 7);

        space.annotations.remove(annotation::WITH_MQTT);
        reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(cluster.object_count(), 5);
        assert_eq!(cluster.delete_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_apply_failures_retry_in_place() {
        let (reconciler, cluster, _) = harness();
        cluster.fail_next_apply(ClusterError::Conflict("broker".into()));
        cluster.fail_next_apply(ClusterError::Timeout("store".into()));
        let mut space = space();
        let mut addresses = Vec::new();

        let outcome = reconciler
            .reconcile(&mut space, &mut addresses, false)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);
        assert_eq!(cluster.object_count(), 5);
    }

    #[tokio::test]
    async fn test_unknown_space_plan_fails_without_touching_cluster() {
        let (reconciler, cluster, _) = harness();
        let mut space = space();
        space.plan = "no-such-plan".into();

        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Failed(_)));
        assert_eq!(cluster.object_count(), 0);
        assert_eq!(
            cluster.space_status("prod/app").unwrap().phase,
            SpacePhase::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_auth_service_blocks() {
        let (reconciler, cluster, catalog) = harness();
        catalog.update(|s| {
            s.auth_services.clear();
        });
        let mut space = space();

        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Blocked(_)));
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_deletes_everything() {
        let (reconciler, cluster, _) = harness();
        let mut space = space();
        reconciler
            .reconcile(&mut space, &mut Vec::new(), false)
            .await
            .unwrap();
        assert!(cluster.object_count() > 0);

        let outcome = reconciler
            .reconcile(&mut space, &mut Vec::new(), true)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Deleted);
        assert_eq!(cluster.object_count(), 0);
        assert_eq!(
            cluster.space_status("prod/app").unwrap().phase,
            SpacePhase::Deleted
        );
        // Teardown announces Terminating before deleting anything.
        let phases = cluster.phase_log();
        assert_eq!(
            &phases[phases.len() - 2..],
            &[SpacePhase::Terminating, SpacePhase::Deleted]
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(10), Duration::from_secs(2));
        assert_eq!(backoff.delay(40), Duration::from_secs(2));
    }
}
