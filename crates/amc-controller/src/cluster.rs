//! Cluster Resource Collaborator
//!
//! Narrow async seam to the cluster-resource store: list owned infra
//! objects, apply/delete them, read secrets, write status. The real
//! transport lives outside this workspace; [`MemoryCluster`] backs tests
//! and demos and counts apply operations so idempotence is observable.

use amc_model::{
    Address, AddressSpace, AddressSpaceStatus, AddressStatus, InfraObject, ResourceKey,
    ResourceSet, SpacePhase,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Cluster access failure
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// Optimistic-concurrency conflict; retried with backoff
    #[error("conflict applying {0}")]
    Conflict(String),
    /// Store timed out; retried with backoff
    #[error("timeout talking to cluster store: {0}")]
    Timeout(String),
    /// Object does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Unrecoverable transport failure
    #[error("cluster io error: {0}")]
    Io(String),
}

impl ClusterError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Timeout(_))
    }
}

/// Secret payload with decoded data entries
#[derive(Debug, Clone)]
pub struct Secret {
    /// Secret name
    pub name: String,
    /// Decoded entries ("tls.crt", "client-id", ...)
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    /// Build a secret from string entries
    pub fn new(name: &str, entries: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            data: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }
}

/// Secret lookup seam
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch a secret by name; `Ok(None)` when absent
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError>;
}

/// Cluster-resource store seam used by the reconcile loop
#[async_trait]
pub trait ClusterClient: SecretClient {
    /// Infra objects owned by one space, selected by infra UUID label
    async fn list_owned(&self, infra_uuid: &str) -> Result<ResourceSet, ClusterError>;
    /// Create-or-replace one object
    async fn apply(&self, object: &InfraObject) -> Result<(), ClusterError>;
    /// Delete one object; deleting an absent object is not an error
    async fn delete(&self, key: &ResourceKey) -> Result<(), ClusterError>;
    /// Write an address's status
    async fn update_address_status(&self, address: &Address) -> Result<(), ClusterError>;
    /// Write an address space's status
    async fn update_space_status(&self, space: &AddressSpace) -> Result<(), ClusterError>;
}

/// In-memory cluster store for tests and demos
#[derive(Default)]
pub struct MemoryCluster {
    objects: DashMap<ResourceKey, InfraObject>,
    secrets: DashMap<String, Secret>,
    address_status: DashMap<String, AddressStatus>,
    space_status: DashMap<String, AddressSpaceStatus>,
    phase_log: Mutex<Vec<SpacePhase>>,
    apply_count: AtomicU64,
    delete_count: AtomicU64,
    fail_queue: Mutex<VecDeque<ClusterError>>,
}

impl MemoryCluster {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret
    pub fn put_secret(&self, secret: Secret) {
        self.secrets.insert(secret.name.clone(), secret);
    }

    /// Queue an error returned by the next apply call (failure injection)
    pub fn fail_next_apply(&self, error: ClusterError) {
        self.fail_queue.lock().push_back(error);
    }

    /// Total apply operations served
    pub fn apply_count(&self) -> u64 {
        self.apply_count.load(Ordering::Relaxed)
    }

    /// Total delete operations served
    pub fn delete_count(&self) -> u64 {
        self.delete_count.load(Ordering::Relaxed)
    }

    /// Stored object count
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Last written status for an address key (namespace/name)
    pub fn address_status(&self, key: &str) -> Option<AddressStatus> {
        self.address_status.get(key).map(|s| s.clone())
    }

    /// Last written status for a space key (namespace/name)
    pub fn space_status(&self, key: &str) -> Option<AddressSpaceStatus> {
        self.space_status.get(key).map(|s| s.clone())
    }

    /// Every phase written through `update_space_status`, in order
    pub fn phase_log(&self) -> Vec<SpacePhase> {
        self.phase_log.lock().clone()
    }
}

#[async_trait]
impl SecretClient for MemoryCluster {
    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secrets.get(name).map(|s| s.clone()))
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn list_owned(&self, infra_uuid: &str) -> Result<ResourceSet, ClusterError> {
        let owned = self
            .objects
            .iter()
            .filter(|entry| entry.value().infra_uuid() == Some(infra_uuid))
            .map(|entry| entry.value().clone());
        Ok(ResourceSet::from_objects(owned))
    }

    async fn apply(&self, object: &InfraObject) -> Result<(), ClusterError> {
        if let Some(error) = self.fail_queue.lock().pop_front() {
            return Err(error);
        }
        self.apply_count.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(object.key(), object.clone());
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), ClusterError> {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        self.objects.remove(key);
        Ok(())
    }

    async fn update_address_status(&self, address: &Address) -> Result<(), ClusterError> {
        self.address_status
            .insert(address.key(), address.status.clone());
        Ok(())
    }

    async fn update_space_status(&self, space: &AddressSpace) -> Result<(), ClusterError> {
        self.phase_log.lock().push(space.status.phase);
        self.space_status
            .insert(space.key().to_string(), space.status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amc_model::{resource::label, ObjectMeta};
    use serde_json::json;

    fn owned_object(name: &str, uuid: &str) -> InfraObject {
        let mut labels = BTreeMap::new();
        labels.insert(label::INFRA_UUID.to_string(), uuid.to_string());
        InfraObject {
            kind: "Deployment".into(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: "amc-infra".into(),
                labels,
                annotations: BTreeMap::new(),
            },
            spec: json!({}),
        }
    }

    #[tokio::test]
    async fn test_list_owned_filters_by_uuid() {
        let cluster = MemoryCluster::new();
        cluster.apply(&owned_object("a", "uuid-1")).await.unwrap();
        cluster.apply(&owned_object("b", "uuid-2")).await.unwrap();

        let owned = cluster.list_owned("uuid-1").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned.iter().next().unwrap().metadata.name, "a");
    }

    #[tokio::test]
    async fn test_fail_injection_consumed_once() {
        let cluster = MemoryCluster::new();
        cluster.fail_next_apply(ClusterError::Conflict("deployment a".into()));

        let object = owned_object("a", "uuid-1");
        assert!(cluster.apply(&object).await.is_err());
        assert!(cluster.apply(&object).await.is_ok());
        assert_eq!(cluster.apply_count(), 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(ClusterError::Conflict("x".into()).is_transient());
        assert!(ClusterError::Timeout("x".into()).is_transient());
        assert!(!ClusterError::Io("x".into()).is_transient());
    }
}
