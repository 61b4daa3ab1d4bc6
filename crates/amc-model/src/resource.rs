//! Synthesized Infrastructure Objects and Resource-Set Diffing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Well-known labels stamped onto every synthesized object
pub mod label {
    /// Owning application
    pub const APP: &str = "app";
    /// Infra UUID of the owning address space
    pub const INFRA_UUID: &str = "infraUuid";
    /// Infra template family ("standard"/"brokered")
    pub const INFRA_TYPE: &str = "infraType";
    /// Workload role ("router", "broker", "admin", "mqtt", ...)
    pub const ROLE: &str = "role";
}

/// Identity of an infra object for diffing: kind, namespace, name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// Object kind, e.g. "StatefulSet"
    pub kind: String,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ResourceKey {
    /// Build a key
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// A single typed infrastructure object produced by template rendering
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfraObject {
    /// Object kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Kind-specific payload
    pub spec: Value,
}

impl InfraObject {
    /// Identity key for diffing
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.kind, &self.metadata.namespace, &self.metadata.name)
    }

    /// Workload role label, when stamped
    pub fn role(&self) -> Option<&str> {
        self.metadata.labels.get(label::ROLE).map(|s| s.as_str())
    }

    /// Infra UUID label, when stamped
    pub fn infra_uuid(&self) -> Option<&str> {
        self.metadata.labels.get(label::INFRA_UUID).map(|s| s.as_str())
    }
}

/// Desired or live set of infra objects keyed by (kind, namespace, name)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSet {
    objects: BTreeMap<ResourceKey, InfraObject>,
}

impl ResourceSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from rendered objects
    pub fn from_objects(objects: impl IntoIterator<Item = InfraObject>) -> Self {
        let mut set = Self::new();
        for object in objects {
            set.insert(object);
        }
        set
    }

    /// Insert or replace an object
    pub fn insert(&mut self, object: InfraObject) {
        self.objects.insert(object.key(), object);
    }

    /// Lookup by key
    pub fn get(&self, key: &ResourceKey) -> Option<&InfraObject> {
        self.objects.get(key)
    }

    /// Mutable lookup of the unique object with a kind and role label
    pub fn find_role_mut(&mut self, kind: &str, role: &str) -> Option<&mut InfraObject> {
        self.objects
            .values_mut()
            .find(|o| o.kind == kind && o.role() == Some(role))
    }

    /// Mutable iteration over every object of a kind
    pub fn iter_kind_mut(&mut self, kind: &str) -> impl Iterator<Item = &mut InfraObject> {
        let kind = kind.to_string();
        self.objects.values_mut().filter(move |o| o.kind == kind)
    }

    /// Iterate objects in key order
    pub fn iter(&self) -> impl Iterator<Item = &InfraObject> {
        self.objects.values()
    }

    /// Iterate keys in order
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.objects.keys()
    }

    /// Object count
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Compute the change set turning `live` into `self`.
    ///
    /// Creates: desired keys absent from live. Updates: present in both but
    /// not equal. Deletes: live keys no longer desired (stale infra garbage
    /// collection).
    pub fn diff(&self, live: &ResourceSet) -> ResourceDiff {
        let mut diff = ResourceDiff::default();
        for (key, desired) in &self.objects {
            match live.objects.get(key) {
                None => diff.creates.push(desired.clone()),
                Some(existing) if existing != desired => diff.updates.push(desired.clone()),
                Some(_) => {}
            }
        }
        for key in live.objects.keys() {
            if !self.objects.contains_key(key) {
                diff.deletes.push(key.clone());
            }
        }
        diff
    }
}

/// Change set produced by [`ResourceSet::diff`]
#[derive(Debug, Clone, Default)]
pub struct ResourceDiff {
    /// Objects to create
    pub creates: Vec<InfraObject>,
    /// Objects to replace
    pub updates: Vec<InfraObject>,
    /// Keys to delete
    pub deletes: Vec<ResourceKey>,
}

impl ResourceDiff {
    /// Whether the diff contains no work
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Number of apply operations the diff requires
    pub fn change_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}
