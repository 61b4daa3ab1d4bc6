//! Infrastructure Configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-component sizing for one infra generation, selected by a space or
/// defaulted from its plan. Versioned so running spaces can be upgraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InfraConfig {
    /// Router mesh plus broker pool sizing
    Standard(StandardInfraConfig),
    /// Single-broker sizing
    Brokered(BrokeredInfraConfig),
}

impl InfraConfig {
    /// Config name
    pub fn name(&self) -> &str {
        match self {
            Self::Standard(c) => &c.name,
            Self::Brokered(c) => &c.name,
        }
    }

    /// Config version
    pub fn version(&self) -> &str {
        match self {
            Self::Standard(c) => &c.version,
            Self::Brokered(c) => &c.version,
        }
    }

    /// Broker section, when declared
    pub fn broker(&self) -> Option<&BrokerConfig> {
        match self {
            Self::Standard(c) => c.broker.as_ref(),
            Self::Brokered(c) => c.broker.as_ref(),
        }
    }

    /// Admin section, when declared
    pub fn admin(&self) -> Option<&AdminConfig> {
        match self {
            Self::Standard(c) => c.admin.as_ref(),
            Self::Brokered(c) => c.admin.as_ref(),
        }
    }

    /// Annotations (template name overrides)
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        match self {
            Self::Standard(c) => &c.annotations,
            Self::Brokered(c) => &c.annotations,
        }
    }
}

/// Infra config for standard (routed) address spaces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardInfraConfig {
    /// Config name
    pub name: String,
    /// Config version
    pub version: String,
    /// Broker pool sizing
    pub broker: Option<BrokerConfig>,
    /// Router mesh sizing
    pub router: Option<RouterConfig>,
    /// Admin/agent sizing
    pub admin: Option<AdminConfig>,
    /// Annotations (template name overrides)
    pub annotations: BTreeMap<String, String>,
}

/// Infra config for brokered address spaces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokeredInfraConfig {
    /// Config name
    pub name: String,
    /// Config version
    pub version: String,
    /// Broker sizing
    pub broker: Option<BrokerConfig>,
    /// Admin/agent sizing
    pub admin: Option<AdminConfig>,
    /// Annotations (template name overrides)
    pub annotations: BTreeMap<String, String>,
}

/// Broker sizing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Container memory limit, e.g. "512Mi"
    pub memory: Option<String>,
    /// Persistent volume size, e.g. "2Gi"
    pub storage: Option<String>,
    /// Behaviour when an address is full (FAIL, BLOCK, PAGE, DROP)
    pub address_full_policy: Option<String>,
    /// Global pool size split across addresses by broker credit, e.g. "1Mb"
    pub global_max_size: Option<String>,
    /// Storage class for broker volumes
    pub storage_class_name: Option<String>,
    /// Operator-declared pod template fragments for broker workloads
    pub pod_template: Option<PodTemplateOverride>,
}

impl BrokerConfig {
    /// Global max size in bytes, when declared and parseable
    pub fn global_max_size_bytes(&self) -> Option<u64> {
        self.global_max_size.as_deref().and_then(parse_to_bytes)
    }
}

/// Router sizing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Container memory limit
    pub memory: Option<String>,
    /// Link credit per router link
    pub link_capacity: Option<u32>,
    /// TLS handshake timeout in seconds
    pub handshake_timeout: Option<u32>,
    /// Connection idle timeout in seconds
    pub idle_timeout: Option<u32>,
    /// Router worker thread count
    pub worker_threads: Option<u32>,
    /// Minimum router replicas
    pub min_replicas: Option<u32>,
    /// Operator-declared pod template fragments for the router set
    pub pod_template: Option<PodTemplateOverride>,
}

/// Admin/agent sizing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Container memory limit
    pub memory: Option<String>,
    /// Operator-declared pod template fragments for the admin deployment
    pub pod_template: Option<PodTemplateOverride>,
}

/// Pod template fragments merged onto a specific workload object.
///
/// Merge precedence, field by field: override entries win over template
/// entries of the same key; template entries without an override are left
/// untouched; container resources are matched by container name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodTemplateOverride {
    /// Extra pod labels
    pub labels: BTreeMap<String, String>,
    /// Extra pod annotations
    pub annotations: BTreeMap<String, String>,
    /// Node selector entries
    pub node_selector: BTreeMap<String, String>,
    /// Pod priority class
    pub priority_class_name: Option<String>,
    /// Per-container resource overrides
    pub containers: Vec<ContainerOverride>,
}

/// Resource overrides for one named container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerOverride {
    /// Container name to match
    pub name: String,
    /// Memory request
    pub memory_request: Option<String>,
    /// CPU request
    pub cpu_request: Option<String>,
    /// Memory limit
    pub memory_limit: Option<String>,
    /// CPU limit
    pub cpu_limit: Option<String>,
}

impl PodTemplateOverride {
    /// Merge this override onto a rendered pod template
    /// (the `template` value inside a workload object's spec).
    pub fn apply_to(&self, pod_template: &mut Value) {
        let metadata = ensure_object(pod_template, "metadata");
        merge_string_map(ensure_object(metadata, "labels"), &self.labels);
        let metadata = ensure_object(pod_template, "metadata");
        merge_string_map(ensure_object(metadata, "annotations"), &self.annotations);

        let spec = ensure_object(pod_template, "spec");
        if !self.node_selector.is_empty() {
            merge_string_map(ensure_object(spec, "nodeSelector"), &self.node_selector);
        }
        let spec = ensure_object(pod_template, "spec");
        if let Some(priority) = &self.priority_class_name {
            spec["priorityClassName"] = Value::String(priority.clone());
        }

        for container_override in &self.containers {
            if let Some(containers) = spec.get_mut("containers").and_then(Value::as_array_mut) {
                for container in containers {
                    if container.get("name").and_then(Value::as_str) == Some(&container_override.name) {
                        apply_container_resources(container, container_override);
                    }
                }
            }
        }
    }
}

fn ensure_object<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(serde_json::Map::new());
    }
    let map = value.as_object_mut().unwrap();
    map.entry(key.to_string()).or_insert_with(|| Value::Object(serde_json::Map::new()))
}

fn merge_string_map(target: &mut Value, entries: &BTreeMap<String, String>) {
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let map = target.as_object_mut().unwrap();
    for (k, v) in entries {
        map.insert(k.clone(), Value::String(v.clone()));
    }
}

fn apply_container_resources(container: &mut Value, entry: &ContainerOverride) {
    let resources = ensure_object(container, "resources");
    if entry.memory_request.is_some() || entry.cpu_request.is_some() {
        let requests = ensure_object(resources, "requests");
        if let Some(memory) = &entry.memory_request {
            requests["memory"] = Value::String(memory.clone());
        }
        if let Some(cpu) = &entry.cpu_request {
            requests["cpu"] = Value::String(cpu.clone());
        }
    }
    let resources = ensure_object(container, "resources");
    if entry.memory_limit.is_some() || entry.cpu_limit.is_some() {
        let limits = ensure_object(resources, "limits");
        if let Some(memory) = &entry.memory_limit {
            limits["memory"] = Value::String(memory.clone());
        }
        if let Some(cpu) = &entry.cpu_limit {
            limits["cpu"] = Value::String(cpu.clone());
        }
    }
}

/// Parse a size string like "1Mb", "512Ki", "64MB" or "1048576" into bytes.
/// Unit suffixes are case-insensitive; binary units (Ki/Mi/Gi/Ti) use 1024
/// multiples, decimal and bare K/M/G/T use 1024 as well, matching how the
/// brokers interpret their size settings.
pub fn parse_to_bytes(quantity: &str) -> Option<u64> {
    let trimmed = quantity.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let number: u64 = trimmed[..digits_end].parse().ok()?;
    let unit = trimmed[digits_end..].trim().to_ascii_lowercase();
    let multiplier: u64 = match unit.as_str() {
        "" | "b" => 1,
        "k" | "kb" | "ki" | "kib" => 1024,
        "m" | "mb" | "mi" | "mib" => 1024 * 1024,
        "g" | "gb" | "gi" | "gib" => 1024 * 1024 * 1024,
        "t" | "tb" | "ti" | "tib" => 1024u64.pow(4),
        _ => return None,
    };
    number.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_to_bytes() {
        assert_eq!(parse_to_bytes("1048576"), Some(1_048_576));
        assert_eq!(parse_to_bytes("1Mb"), Some(1_048_576));
        assert_eq!(parse_to_bytes("512Ki"), Some(524_288));
        assert_eq!(parse_to_bytes("2Gi"), Some(2_147_483_648));
        assert_eq!(parse_to_bytes("nonsense"), None);
        assert_eq!(parse_to_bytes("12Qx"), None);
    }

    #[test]
    fn test_global_max_size_bytes() {
        let broker = BrokerConfig {
            global_max_size: Some("1Mb".into()),
            ..Default::default()
        };
        assert_eq!(broker.global_max_size_bytes(), Some(1_048_576));
        assert_eq!(BrokerConfig::default().global_max_size_bytes(), None);
    }

    #[test]
    fn test_pod_template_merge_precedence() {
        let mut template = json!({
            "metadata": {"labels": {"app": "openamc", "tier": "infra"}},
            "spec": {
                "containers": [
                    {"name": "router", "resources": {"limits": {"memory": "512Mi"}}}
                ]
            }
        });

        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "platinum".to_string());
        let override_spec = PodTemplateOverride {
            labels,
            priority_class_name: Some("messaging-critical".into()),
            containers: vec![ContainerOverride {
                name: "router".into(),
                memory_limit: Some("1Gi".into()),
                cpu_request: Some("500m".into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        override_spec.apply_to(&mut template);

        // Override wins, untouched template entries survive.
        assert_eq!(template["metadata"]["labels"]["tier"], "platinum");
        assert_eq!(template["metadata"]["labels"]["app"], "openamc");
        assert_eq!(template["spec"]["priorityClassName"], "messaging-critical");
        assert_eq!(
            template["spec"]["containers"][0]["resources"]["limits"]["memory"],
            "1Gi"
        );
        assert_eq!(
            template["spec"]["containers"][0]["resources"]["requests"]["cpu"],
            "500m"
        );
    }

    #[test]
    fn test_pod_template_merge_ignores_other_containers() {
        let mut template = json!({
            "spec": {"containers": [{"name": "broker"}]}
        });
        let override_spec = PodTemplateOverride {
            containers: vec![ContainerOverride {
                name: "router".into(),
                memory_limit: Some("1Gi".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        override_spec.apply_to(&mut template);
        assert!(template["spec"]["containers"][0].get("resources").is_none());
    }
}
