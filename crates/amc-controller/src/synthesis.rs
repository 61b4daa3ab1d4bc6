//! Infra Resource Synthesizer
//!
//! Turns an admitted desired state into the parameterized manifest set for
//! one address space. Pure with respect to the cluster: the only I/O is
//! secret lookup for certificate material and the local CA bundle
//! fallback. Output is keyed by (kind, namespace, name) for diffing.

use crate::admission::AllocationResult;
use crate::capacity::broker_address_settings;
use crate::cluster::{ClusterError, SecretClient};
use crate::template::{param, templates, Params, RenderError, TemplateRenderer};
use amc_model::space::annotation;
use amc_model::{
    resource::label, AddressSpace, AddressSpaceType, AuthenticationService, BrokeredInfraConfig,
    ConsoleService, InfraConfig, InfraObject, ObjectMeta, ResourceSet, StandardInfraConfig,
};
use base64::Engine;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Default CA bundle consulted when the auth service names no CA secret
pub const DEFAULT_CA_BUNDLE: &str = "/etc/ssl/certs/ca-bundle.crt";

/// Synthesis failure
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Auth service has no status yet; retried on its next watch event
    #[error("authentication service '{0}' is not yet deployed")]
    DependencyNotReady(String),
    /// Infra uuid not assigned; the space was never prepared by the loop
    #[error("address space has no infra uuid assigned")]
    MissingInfraUuid,
    /// Space type and infra config flavour disagree
    #[error("infra config '{config}' does not match address space type '{space_type}'")]
    InfraConfigMismatch {
        /// Offending config name
        config: String,
        /// Space type
        space_type: AddressSpaceType,
    },
    /// Required endpoint has no certificate mapping
    #[error("no certificate configured for required service '{service}'")]
    MissingEndpointCert {
        /// Logical service name
        service: String,
    },
    /// Template rendering failed
    #[error(transparent)]
    Render(#[from] RenderError),
    /// Pod-template override names a workload absent from the rendered set
    #[error("pod template target {kind} with role '{role}' not found in rendered set")]
    OverrideTargetMissing {
        /// Expected object kind
        kind: String,
        /// Expected role label
        role: String,
    },
    /// Local CA bundle fallback could not be read
    #[error("unable to read CA bundle {path}: {source}")]
    CaBundle {
        /// Bundle path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Referenced secret absent or missing the required entry
    #[error("unable to decode secret '{0}'")]
    BadSecret(String),
    /// Secret lookup failed at the cluster store
    #[error("secret lookup failed: {0}")]
    Secret(#[from] ClusterError),
}

impl SynthesisError {
    /// Non-fatal errors are retried on the next relevant watch event
    /// rather than failing the space.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DependencyNotReady(_) => true,
            Self::Secret(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Synthesized manifests plus best-effort warnings (console OAuth)
#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    /// Desired infra objects for the space
    pub resources: ResourceSet,
    /// Degradations that do not block the space (console wiring)
    pub warnings: Vec<String>,
}

/// Builds the manifest set for admitted address spaces
pub struct Synthesizer {
    renderer: Arc<dyn TemplateRenderer>,
    secrets: Arc<dyn SecretClient>,
    infra_namespace: String,
    ca_bundle: PathBuf,
}

impl Synthesizer {
    /// Synthesizer rendering into the given infra namespace
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        secrets: Arc<dyn SecretClient>,
        infra_namespace: &str,
        ca_bundle: &Path,
    ) -> Self {
        Self {
            renderer,
            secrets,
            infra_namespace: infra_namespace.to_string(),
            ca_bundle: ca_bundle.to_path_buf(),
        }
    }

    /// Synthesize the full manifest set for one space.
    ///
    /// Fails fast with [`SynthesisError::DependencyNotReady`] before any
    /// manifest is produced when the auth service has no status.
    pub async fn synthesize(
        &self,
        space: &AddressSpace,
        infra: &InfraConfig,
        allocation: &AllocationResult,
        auth: &AuthenticationService,
        console: Option<&ConsoleService>,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let mut warnings = Vec::new();
        let params = self.prepare_parameters(space, auth, console, &mut warnings).await?;

        let resources = match (space.space_type, infra) {
            (AddressSpaceType::Standard, InfraConfig::Standard(config)) => {
                self.standard_infra(space, config, allocation, params)?
            }
            (AddressSpaceType::Brokered, InfraConfig::Brokered(config)) => {
                self.brokered_infra(space, config, allocation, params)?
            }
            _ => {
                return Err(SynthesisError::InfraConfigMismatch {
                    config: infra.name().to_string(),
                    space_type: space.space_type,
                })
            }
        };

        Ok(SynthesisOutcome { resources, warnings })
    }

    /// Shared parameters: identity, auth service wiring, endpoint
    /// certificates and best-effort console OAuth.
    async fn prepare_parameters(
        &self,
        space: &AddressSpace,
        auth: &AuthenticationService,
        console: Option<&ConsoleService>,
        warnings: &mut Vec<String>,
    ) -> Result<Params, SynthesisError> {
        let status = auth
            .status
            .as_ref()
            .ok_or_else(|| SynthesisError::DependencyNotReady(auth.name.clone()))?;
        let infra_uuid = space.infra_uuid().ok_or(SynthesisError::MissingInfraUuid)?;

        let mut params = Params::new();
        params.insert(param::ADDRESS_SPACE.into(), space.name.clone());
        params.insert(param::ADDRESS_SPACE_NAMESPACE.into(), space.namespace.clone());
        params.insert(param::ADDRESS_SPACE_PLAN.into(), space.plan.clone());
        params.insert(param::INFRA_UUID.into(), infra_uuid.to_string());
        params.insert(param::INFRA_NAMESPACE.into(), self.infra_namespace.clone());
        params.insert(param::AUTHENTICATION_SERVICE_HOST.into(), status.host.clone());
        params.insert(
            param::AUTHENTICATION_SERVICE_PORT.into(),
            status.port.to_string(),
        );
        params.insert(
            param::AUTHENTICATION_SERVICE_CA_CERT.into(),
            self.resolve_ca_cert(status.ca_cert_secret.as_deref()).await?,
        );
        if let Some(client_secret) = &status.client_cert_secret {
            params.insert(
                param::AUTHENTICATION_SERVICE_CLIENT_SECRET.into(),
                client_secret.clone(),
            );
        }

        // SASL init host: service realm, else the space's realm annotation.
        let sasl_init_host = auth
            .realm
            .clone()
            .or_else(|| space.annotations.get(annotation::REALM_NAME).cloned())
            .unwrap_or_else(|| space.name.clone());
        params.insert(param::AUTHENTICATION_SERVICE_SASL_INIT_HOST.into(), sasl_init_host);
        if let Some(oauth_url) = &auth.oauth_url {
            params.insert(param::AUTHENTICATION_SERVICE_OAUTH_URL.into(), oauth_url.clone());
        }

        params.insert(
            param::MESSAGING_SECRET.into(),
            self.required_cert(space, "messaging")?,
        );
        params.insert(
            param::CONSOLE_SECRET.into(),
            self.required_cert(space, "console")?,
        );

        self.console_oauth(console, &mut params, warnings).await;

        Ok(params)
    }

    /// CA material: the referenced secret's "tls.crt", else the local
    /// bundle. A missing referenced secret is a configuration error; a
    /// missing bundle is a local I/O failure.
    async fn resolve_ca_cert(&self, secret_name: Option<&str>) -> Result<String, SynthesisError> {
        let engine = base64::engine::general_purpose::STANDARD;
        if let Some(name) = secret_name {
            let secret = self
                .secrets
                .get_secret(name)
                .await?
                .ok_or_else(|| SynthesisError::BadSecret(name.to_string()))?;
            let cert = secret
                .data
                .get("tls.crt")
                .ok_or_else(|| SynthesisError::BadSecret(name.to_string()))?;
            return Ok(engine.encode(cert));
        }
        let bytes = std::fs::read(&self.ca_bundle).map_err(|source| SynthesisError::CaBundle {
            path: self.ca_bundle.display().to_string(),
            source,
        })?;
        Ok(engine.encode(bytes))
    }

    fn required_cert(&self, space: &AddressSpace, service: &str) -> Result<String, SynthesisError> {
        space
            .endpoint_cert_secret(service)
            .map(|s| s.to_string())
            .ok_or_else(|| SynthesisError::MissingEndpointCert {
                service: service.to_string(),
            })
    }

    /// Console OAuth is best-effort: any failure records a warning and
    /// leaves the OAuth parameters unset.
    async fn console_oauth(
        &self,
        console: Option<&ConsoleService>,
        params: &mut Params,
        warnings: &mut Vec<String>,
    ) {
        let Some(console) = console else {
            warnings.push(
                "no console service found, address space console will be unavailable".to_string(),
            );
            return;
        };
        let Some(secret_name) = &console.oauth_client_secret else {
            warnings.push(format!(
                "console service '{}' declares no OAuth client secret",
                console.name
            ));
            return;
        };

        let entries = match self.secrets.get_secret(secret_name).await {
            Ok(Some(secret)) => secret.data,
            Ok(None) | Err(_) => {
                warn!(secret = %secret_name, "console OAuth secret unreadable");
                warnings.push(format!(
                    "console OAuth secret '{secret_name}' unreadable, console will be unavailable"
                ));
                return;
            }
        };
        let (Some(client_id), Some(client_secret)) = (
            entries.get("client-id").and_then(|v| String::from_utf8(v.clone()).ok()),
            entries.get("client-secret").and_then(|v| String::from_utf8(v.clone()).ok()),
        ) else {
            warnings.push(format!(
                "console OAuth secret '{secret_name}' is missing client-id/client-secret"
            ));
            return;
        };

        params.insert(param::CONSOLE_OAUTH_CLIENT_ID.into(), client_id);
        params.insert(param::CONSOLE_OAUTH_CLIENT_SECRET.into(), client_secret);
        if let Some(url) = &console.discovery_metadata_url {
            params.insert(param::CONSOLE_OAUTH_DISCOVERY_URL.into(), url.clone());
        }
        if let Some(scope) = &console.scope {
            params.insert(param::CONSOLE_OAUTH_SCOPE.into(), scope.clone());
        }
    }

    fn standard_infra(
        &self,
        space: &AddressSpace,
        config: &StandardInfraConfig,
        allocation: &AllocationResult,
        mut params: Params,
    ) -> Result<ResourceSet, SynthesisError> {
        if let Some(broker) = &config.broker {
            insert_opt(&mut params, param::BROKER_MEMORY_LIMIT, &broker.memory);
            insert_opt(&mut params, param::BROKER_STORAGE_CAPACITY, &broker.storage);
            insert_opt(&mut params, param::BROKER_ADDRESS_FULL_POLICY, &broker.address_full_policy);
            insert_opt(&mut params, param::BROKER_GLOBAL_MAX_SIZE, &broker.global_max_size);
        }
        if let Some(router) = &config.router {
            insert_opt(&mut params, param::ROUTER_MEMORY_LIMIT, &router.memory);
            insert_num(&mut params, param::ROUTER_LINK_CAPACITY, router.link_capacity);
            insert_num(&mut params, param::ROUTER_HANDSHAKE_TIMEOUT, router.handshake_timeout);
            insert_num(&mut params, param::ROUTER_IDLE_TIMEOUT, router.idle_timeout);
            insert_num(&mut params, param::ROUTER_WORKER_THREADS, router.worker_threads);
        }
        if let Some(admin) = &config.admin {
            insert_opt(&mut params, param::ADMIN_MEMORY_LIMIT, &admin.memory);
        }
        params.insert(param::STANDARD_INFRA_CONFIG_NAME.into(), config.name.clone());

        let template_name = config
            .annotations
            .get(annotation::TEMPLATE_NAME)
            .map(|s| s.as_str())
            .unwrap_or(templates::STANDARD_SPACE_INFRA);
        let mut resources =
            ResourceSet::from_objects(self.renderer.render(template_name, &params)?);

        if let Some(router) = &config.router {
            if let Some(min_replicas) = router.min_replicas {
                if let Some(router_set) = resources.find_role_mut("StatefulSet", "router") {
                    router_set.spec["replicas"] = json!(min_replicas);
                }
            }
            if let Some(pod_template) = &router.pod_template {
                apply_pod_template(&mut resources, "StatefulSet", "router", pod_template)?;
            }
        }
        if let Some(admin) = &config.admin {
            if let Some(pod_template) = &admin.pod_template {
                apply_pod_template(&mut resources, "Deployment", "admin", pod_template)?;
            }
        }
        if let Some(broker) = &config.broker {
            if let Some(pod_template) = &broker.pod_template {
                apply_pod_template(&mut resources, "StatefulSet", "broker", pod_template)?;
            }
            if let Some(storage_class) = &broker.storage_class_name {
                apply_storage_class(&mut resources, storage_class);
            }
        }

        if space.with_mqtt() {
            let mut mqtt_params = Params::new();
            for key in [param::ADDRESS_SPACE, param::INFRA_UUID, param::INFRA_NAMESPACE] {
                if let Some(value) = params.get(key) {
                    mqtt_params.insert(key.to_string(), value.clone());
                }
            }
            mqtt_params.insert(param::MQTT_SECRET.into(), self.required_cert(space, "mqtt")?);
            let mqtt_template = config
                .annotations
                .get(annotation::MQTT_TEMPLATE_NAME)
                .map(|s| s.as_str())
                .unwrap_or(templates::STANDARD_SPACE_INFRA_MQTT);
            for object in self.renderer.render(mqtt_template, &mqtt_params)? {
                resources.insert(object);
            }
        }

        self.append_broker_settings(space, config.broker.as_ref(), allocation, &mut resources);
        Ok(resources)
    }

    fn brokered_infra(
        &self,
        space: &AddressSpace,
        config: &BrokeredInfraConfig,
        allocation: &AllocationResult,
        mut params: Params,
    ) -> Result<ResourceSet, SynthesisError> {
        if let Some(broker) = &config.broker {
            insert_opt(&mut params, param::BROKER_MEMORY_LIMIT, &broker.memory);
            insert_opt(&mut params, param::BROKER_STORAGE_CAPACITY, &broker.storage);
            insert_opt(&mut params, param::BROKER_ADDRESS_FULL_POLICY, &broker.address_full_policy);
            insert_opt(&mut params, param::BROKER_GLOBAL_MAX_SIZE, &broker.global_max_size);
        }
        if let Some(admin) = &config.admin {
            insert_opt(&mut params, param::ADMIN_MEMORY_LIMIT, &admin.memory);
        }

        let template_name = config
            .annotations
            .get(annotation::TEMPLATE_NAME)
            .map(|s| s.as_str())
            .unwrap_or(templates::BROKERED_SPACE_INFRA);
        let mut resources =
            ResourceSet::from_objects(self.renderer.render(template_name, &params)?);

        if let Some(admin) = &config.admin {
            if let Some(pod_template) = &admin.pod_template {
                apply_pod_template(&mut resources, "Deployment", "admin", pod_template)?;
            }
        }
        if let Some(broker) = &config.broker {
            if let Some(pod_template) = &broker.pod_template {
                apply_pod_template(&mut resources, "Deployment", "broker", pod_template)?;
            }
            if let Some(storage_class) = &broker.storage_class_name {
                apply_storage_class(&mut resources, storage_class);
            }
        }

        self.append_broker_settings(space, config.broker.as_ref(), allocation, &mut resources);
        Ok(resources)
    }

    /// Per-address broker settings derived from the global pool; patched
    /// in place whenever the global value or a credit changes.
    fn append_broker_settings(
        &self,
        space: &AddressSpace,
        broker: Option<&amc_model::infra::BrokerConfig>,
        allocation: &AllocationResult,
        resources: &mut ResourceSet,
    ) {
        let Some(global_max) = broker.and_then(|b| b.global_max_size_bytes()) else {
            return;
        };
        let settings = broker_address_settings(allocation, global_max);
        let infra_uuid = space.infra_uuid().unwrap_or_default();

        let mut labels = BTreeMap::new();
        labels.insert(label::APP.to_string(), "openamc".to_string());
        labels.insert(label::ROLE.to_string(), "broker-settings".to_string());
        labels.insert(label::INFRA_UUID.to_string(), infra_uuid.to_string());

        let entries: serde_json::Map<String, Value> = settings
            .iter()
            .map(|s| (s.address.clone(), json!(s.max_size_bytes)))
            .collect();

        resources.insert(InfraObject {
            kind: "ConfigMap".into(),
            metadata: ObjectMeta {
                name: format!("broker-settings-{infra_uuid}"),
                namespace: self.infra_namespace.clone(),
                labels,
                annotations: BTreeMap::new(),
            },
            spec: json!({ "maxSizeBytes": Value::Object(entries) }),
        });
    }
}

fn insert_opt(params: &mut Params, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.clone());
    }
}

fn insert_num(params: &mut Params, key: &str, value: Option<u32>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.to_string());
    }
}

/// Merge a pod-template override onto the workload identified by kind and
/// role; the target must exist in the rendered set.
fn apply_pod_template(
    resources: &mut ResourceSet,
    kind: &str,
    role: &str,
    pod_template: &amc_model::PodTemplateOverride,
) -> Result<(), SynthesisError> {
    let target =
        resources
            .find_role_mut(kind, role)
            .ok_or_else(|| SynthesisError::OverrideTargetMissing {
                kind: kind.to_string(),
                role: role.to_string(),
            })?;
    pod_template.apply_to(&mut target.spec["template"]);
    Ok(())
}

/// Stamp a storage class onto broker volume claims: claim templates in
/// stateful sets and standalone claims alike.
fn apply_storage_class(resources: &mut ResourceSet, storage_class: &str) {
    for object in resources.iter_kind_mut("StatefulSet") {
        if let Some(claims) = object
            .spec
            .get_mut("volumeClaimTemplates")
            .and_then(Value::as_array_mut)
        {
            for claim in claims {
                claim["spec"]["storageClassName"] = json!(storage_class);
            }
        }
    }
    for object in resources.iter_kind_mut("PersistentVolumeClaim") {
        object.spec["storageClassName"] = json!(storage_class);
    }
}
