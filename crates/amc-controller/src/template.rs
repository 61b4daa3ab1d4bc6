//! Infra Template Rendering
//!
//! Template parameter names are a closed constant set; the renderer turns
//! a parameter map into a list of typed infra objects. The bundled
//! implementation embeds handlebars templates for the standard and
//! brokered families plus the optional MQTT gateway overlay.

use amc_model::InfraObject;
use handlebars::Handlebars;
use std::collections::BTreeMap;
use thiserror::Error;

/// Template parameter names set by the controller
pub mod param {
    /// Address space name
    pub const ADDRESS_SPACE: &str = "ADDRESS_SPACE";
    /// Namespace the space was declared in
    pub const ADDRESS_SPACE_NAMESPACE: &str = "ADDRESS_SPACE_NAMESPACE";
    /// Selected address space plan
    pub const ADDRESS_SPACE_PLAN: &str = "ADDRESS_SPACE_PLAN";
    /// Stable UUID of the space's infrastructure
    pub const INFRA_UUID: &str = "INFRA_UUID";
    /// Namespace the infrastructure is created in
    pub const INFRA_NAMESPACE: &str = "INFRA_NAMESPACE";

    /// Messaging endpoint certificate secret
    pub const MESSAGING_SECRET: &str = "MESSAGING_SECRET";
    /// Console endpoint certificate secret
    pub const CONSOLE_SECRET: &str = "CONSOLE_SECRET";
    /// MQTT endpoint certificate secret
    pub const MQTT_SECRET: &str = "MQTT_SECRET";

    /// Authentication service host
    pub const AUTHENTICATION_SERVICE_HOST: &str = "AUTHENTICATION_SERVICE_HOST";
    /// Authentication service port
    pub const AUTHENTICATION_SERVICE_PORT: &str = "AUTHENTICATION_SERVICE_PORT";
    /// Base64 CA certificate for the authentication service
    pub const AUTHENTICATION_SERVICE_CA_CERT: &str = "AUTHENTICATION_SERVICE_CA_CERT";
    /// Client certificate secret name, when mutual TLS is required
    pub const AUTHENTICATION_SERVICE_CLIENT_SECRET: &str = "AUTHENTICATION_SERVICE_CLIENT_SECRET";
    /// SASL init host (realm)
    pub const AUTHENTICATION_SERVICE_SASL_INIT_HOST: &str = "AUTHENTICATION_SERVICE_SASL_INIT_HOST";
    /// OAuth URL published by the authentication service
    pub const AUTHENTICATION_SERVICE_OAUTH_URL: &str = "AUTHENTICATION_SERVICE_OAUTH_URL";

    /// Broker container memory limit
    pub const BROKER_MEMORY_LIMIT: &str = "BROKER_MEMORY_LIMIT";
    /// Broker volume size
    pub const BROKER_STORAGE_CAPACITY: &str = "BROKER_STORAGE_CAPACITY";
    /// Broker behaviour when an address is full
    pub const BROKER_ADDRESS_FULL_POLICY: &str = "BROKER_ADDRESS_FULL_POLICY";
    /// Broker global pool size split across addresses by credit
    pub const BROKER_GLOBAL_MAX_SIZE: &str = "BROKER_GLOBAL_MAX_SIZE";
    /// Admin container memory limit
    pub const ADMIN_MEMORY_LIMIT: &str = "ADMIN_MEMORY_LIMIT";
    /// Router container memory limit
    pub const ROUTER_MEMORY_LIMIT: &str = "ROUTER_MEMORY_LIMIT";
    /// Router link credit
    pub const ROUTER_LINK_CAPACITY: &str = "ROUTER_LINK_CAPACITY";
    /// Router TLS handshake timeout
    pub const ROUTER_HANDSHAKE_TIMEOUT: &str = "ROUTER_HANDSHAKE_TIMEOUT";
    /// Router idle timeout
    pub const ROUTER_IDLE_TIMEOUT: &str = "ROUTER_IDLE_TIMEOUT";
    /// Router worker thread count
    pub const ROUTER_WORKER_THREADS: &str = "ROUTER_WORKER_THREADS";
    /// Name of the standard infra config in effect
    pub const STANDARD_INFRA_CONFIG_NAME: &str = "STANDARD_INFRA_CONFIG_NAME";

    /// Console OAuth client id
    pub const CONSOLE_OAUTH_CLIENT_ID: &str = "CONSOLE_OAUTH_CLIENT_ID";
    /// Console OAuth client secret
    pub const CONSOLE_OAUTH_CLIENT_SECRET: &str = "CONSOLE_OAUTH_CLIENT_SECRET";
    /// Console OAuth discovery document URL
    pub const CONSOLE_OAUTH_DISCOVERY_URL: &str = "CONSOLE_OAUTH_DISCOVERY_URL";
    /// Console OAuth scope
    pub const CONSOLE_OAUTH_SCOPE: &str = "CONSOLE_OAUTH_SCOPE";
}

/// Well-known template names
pub mod templates {
    /// Router mesh plus broker pool family
    pub const STANDARD_SPACE_INFRA: &str = "standard-space-infra";
    /// MQTT gateway overlay for standard spaces
    pub const STANDARD_SPACE_INFRA_MQTT: &str = "standard-space-infra-mqtt";
    /// Single-broker family
    pub const BROKERED_SPACE_INFRA: &str = "brokered-space-infra";
}

/// Parameter map handed to the renderer
pub type Params = BTreeMap<String, String>;

/// Template render failure
#[derive(Debug, Error)]
pub enum RenderError {
    /// Handlebars rendering failed
    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),
    /// Rendered text did not parse into infra objects
    #[error("template '{0}' produced invalid objects: {1}")]
    Parse(String, serde_json::Error),
}

/// Narrow seam to the template collaborator
pub trait TemplateRenderer: Send + Sync {
    /// Render a named template into a list of infra objects
    fn render(&self, template: &str, params: &Params) -> Result<Vec<InfraObject>, RenderError>;
}

/// Handlebars-backed renderer with the built-in template set
pub struct HandlebarsRenderer {
    handlebars: Handlebars<'static>,
}

impl HandlebarsRenderer {
    /// Renderer with the built-in templates registered
    pub fn new() -> Self {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);

        // Register templates
        hb.register_template_string(templates::STANDARD_SPACE_INFRA, STANDARD_TEMPLATE)
            .unwrap();
        hb.register_template_string(templates::STANDARD_SPACE_INFRA_MQTT, MQTT_TEMPLATE)
            .unwrap();
        hb.register_template_string(templates::BROKERED_SPACE_INFRA, BROKERED_TEMPLATE)
            .unwrap();

        Self { handlebars: hb }
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, params: &Params) -> Result<Vec<InfraObject>, RenderError> {
        let rendered = self.handlebars.render(template, params)?;
        serde_json::from_str(&rendered).map_err(|e| RenderError::Parse(template.to_string(), e))
    }
}

const STANDARD_TEMPLATE: &str = r#"[
  {
    "kind": "StatefulSet",
    "metadata": {
      "name": "qdrouterd-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "qdrouterd", "role": "router", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}", "amc.io/address-space-namespace": "{{ADDRESS_SPACE_NAMESPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "serviceName": "qdrouterd-headless-{{INFRA_UUID}}",
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "router", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "router",
              "image": "openamc/router:latest",
              "env": {
                "LINK_CAPACITY": "{{#if ROUTER_LINK_CAPACITY}}{{ROUTER_LINK_CAPACITY}}{{else}}250{{/if}}",
                "HANDSHAKE_TIMEOUT": "{{#if ROUTER_HANDSHAKE_TIMEOUT}}{{ROUTER_HANDSHAKE_TIMEOUT}}{{else}}10{{/if}}",
                "IDLE_TIMEOUT": "{{#if ROUTER_IDLE_TIMEOUT}}{{ROUTER_IDLE_TIMEOUT}}{{else}}16{{/if}}",
                "WORKER_THREADS": "{{#if ROUTER_WORKER_THREADS}}{{ROUTER_WORKER_THREADS}}{{else}}4{{/if}}",
                "AUTHENTICATION_SERVICE_HOST": "{{AUTHENTICATION_SERVICE_HOST}}",
                "AUTHENTICATION_SERVICE_PORT": "{{AUTHENTICATION_SERVICE_PORT}}",
                "AUTHENTICATION_SERVICE_CA_CERT": "{{AUTHENTICATION_SERVICE_CA_CERT}}",
                {{#if AUTHENTICATION_SERVICE_CLIENT_SECRET}}"AUTHENTICATION_SERVICE_CLIENT_SECRET": "{{AUTHENTICATION_SERVICE_CLIENT_SECRET}}",{{/if}}
                "AUTHENTICATION_SERVICE_SASL_INIT_HOST": "{{AUTHENTICATION_SERVICE_SASL_INIT_HOST}}"
              },
              "resources": {"limits": {"memory": "{{#if ROUTER_MEMORY_LIMIT}}{{ROUTER_MEMORY_LIMIT}}{{else}}512Mi{{/if}}"}},
              "volumeMounts": [{"name": "messaging-cert", "mountPath": "/etc/amc-certs/messaging"}]
            }
          ],
          "volumes": [{"name": "messaging-cert", "secret": {"secretName": "{{MESSAGING_SECRET}}"}}]
        }
      }
    }
  },
  {
    "kind": "StatefulSet",
    "metadata": {
      "name": "broker-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "broker", "role": "broker", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}", "amc.io/address-space-namespace": "{{ADDRESS_SPACE_NAMESPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "serviceName": "broker-headless-{{INFRA_UUID}}",
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "broker", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "broker",
              "image": "openamc/broker:latest",
              "env": {
                "ADDRESS_FULL_POLICY": "{{#if BROKER_ADDRESS_FULL_POLICY}}{{BROKER_ADDRESS_FULL_POLICY}}{{else}}FAIL{{/if}}",
                {{#if BROKER_GLOBAL_MAX_SIZE}}"GLOBAL_MAX_SIZE": "{{BROKER_GLOBAL_MAX_SIZE}}",{{/if}}
                "AUTHENTICATION_SERVICE_HOST": "{{AUTHENTICATION_SERVICE_HOST}}",
                "AUTHENTICATION_SERVICE_PORT": "{{AUTHENTICATION_SERVICE_PORT}}",
                "AUTHENTICATION_SERVICE_CA_CERT": "{{AUTHENTICATION_SERVICE_CA_CERT}}"
              },
              "resources": {"limits": {"memory": "{{#if BROKER_MEMORY_LIMIT}}{{BROKER_MEMORY_LIMIT}}{{else}}512Mi{{/if}}"}}
            }
          ]
        }
      },
      "volumeClaimTemplates": [
        {
          "metadata": {"name": "data"},
          "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": {"requests": {"storage": "{{#if BROKER_STORAGE_CAPACITY}}{{BROKER_STORAGE_CAPACITY}}{{else}}2Gi{{/if}}"}}
          }
        }
      ]
    }
  },
  {
    "kind": "Deployment",
    "metadata": {
      "name": "admin.{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "admin", "role": "admin", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}", "amc.io/address-space-namespace": "{{ADDRESS_SPACE_NAMESPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "admin", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "admin",
              "image": "openamc/admin:latest",
              "env": {
                "ADDRESS_SPACE": "{{ADDRESS_SPACE}}",
                "ADDRESS_SPACE_NAMESPACE": "{{ADDRESS_SPACE_NAMESPACE}}",
                "ADDRESS_SPACE_PLAN": "{{ADDRESS_SPACE_PLAN}}",
                "STANDARD_INFRA_CONFIG_NAME": "{{STANDARD_INFRA_CONFIG_NAME}}",
                "AUTHENTICATION_SERVICE_HOST": "{{AUTHENTICATION_SERVICE_HOST}}",
                "AUTHENTICATION_SERVICE_PORT": "{{AUTHENTICATION_SERVICE_PORT}}",
                "AUTHENTICATION_SERVICE_CA_CERT": "{{AUTHENTICATION_SERVICE_CA_CERT}}",
                {{#if AUTHENTICATION_SERVICE_OAUTH_URL}}"AUTHENTICATION_SERVICE_OAUTH_URL": "{{AUTHENTICATION_SERVICE_OAUTH_URL}}",{{/if}}
                {{#if CONSOLE_OAUTH_CLIENT_ID}}
                "CONSOLE_OAUTH_CLIENT_ID": "{{CONSOLE_OAUTH_CLIENT_ID}}",
                "CONSOLE_OAUTH_CLIENT_SECRET": "{{CONSOLE_OAUTH_CLIENT_SECRET}}",
                "CONSOLE_OAUTH_DISCOVERY_URL": "{{CONSOLE_OAUTH_DISCOVERY_URL}}",
                "CONSOLE_OAUTH_SCOPE": "{{CONSOLE_OAUTH_SCOPE}}",
                {{/if}}
                "AUTHENTICATION_SERVICE_SASL_INIT_HOST": "{{AUTHENTICATION_SERVICE_SASL_INIT_HOST}}"
              },
              "resources": {"limits": {"memory": "{{#if ADMIN_MEMORY_LIMIT}}{{ADMIN_MEMORY_LIMIT}}{{else}}512Mi{{/if}}"}},
              "volumeMounts": [{"name": "console-cert", "mountPath": "/etc/amc-certs/console"}]
            }
          ],
          "volumes": [{"name": "console-cert", "secret": {"secretName": "{{CONSOLE_SECRET}}"}}]
        }
      }
    }
  },
  {
    "kind": "Service",
    "metadata": {
      "name": "messaging-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "messaging", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/cert-secret": "{{MESSAGING_SECRET}}"}
    },
    "spec": {
      "ports": [{"name": "amqps", "port": 5671}],
      "selector": {"role": "router", "infraUuid": "{{INFRA_UUID}}"}
    }
  },
  {
    "kind": "Service",
    "metadata": {
      "name": "console-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "console", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/cert-secret": "{{CONSOLE_SECRET}}"}
    },
    "spec": {
      "ports": [{"name": "https", "port": 8443}],
      "selector": {"role": "admin", "infraUuid": "{{INFRA_UUID}}"}
    }
  }
]"#;

const MQTT_TEMPLATE: &str = r#"[
  {
    "kind": "Deployment",
    "metadata": {
      "name": "mqtt-gateway-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "mqtt-gateway", "role": "mqtt", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "mqtt", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "mqtt-gateway",
              "image": "openamc/mqtt-gateway:latest",
              "volumeMounts": [{"name": "mqtt-cert", "mountPath": "/etc/amc-certs/mqtt"}]
            }
          ],
          "volumes": [{"name": "mqtt-cert", "secret": {"secretName": "{{MQTT_SECRET}}"}}]
        }
      }
    }
  },
  {
    "kind": "Service",
    "metadata": {
      "name": "mqtt-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "mqtt-service", "infraUuid": "{{INFRA_UUID}}", "infraType": "standard"},
      "annotations": {"amc.io/cert-secret": "{{MQTT_SECRET}}"}
    },
    "spec": {
      "ports": [{"name": "secure-mqtt", "port": 8883}],
      "selector": {"role": "mqtt", "infraUuid": "{{INFRA_UUID}}"}
    }
  }
]"#;

const BROKERED_TEMPLATE: &str = r#"[
  {
    "kind": "Deployment",
    "metadata": {
      "name": "broker-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "broker", "role": "broker", "infraUuid": "{{INFRA_UUID}}", "infraType": "brokered"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}", "amc.io/address-space-namespace": "{{ADDRESS_SPACE_NAMESPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "broker", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "broker",
              "image": "openamc/broker:latest",
              "env": {
                "ADDRESS_FULL_POLICY": "{{#if BROKER_ADDRESS_FULL_POLICY}}{{BROKER_ADDRESS_FULL_POLICY}}{{else}}FAIL{{/if}}",
                {{#if BROKER_GLOBAL_MAX_SIZE}}"GLOBAL_MAX_SIZE": "{{BROKER_GLOBAL_MAX_SIZE}}",{{/if}}
                "AUTHENTICATION_SERVICE_HOST": "{{AUTHENTICATION_SERVICE_HOST}}",
                "AUTHENTICATION_SERVICE_PORT": "{{AUTHENTICATION_SERVICE_PORT}}",
                "AUTHENTICATION_SERVICE_CA_CERT": "{{AUTHENTICATION_SERVICE_CA_CERT}}"
              },
              "resources": {"limits": {"memory": "{{#if BROKER_MEMORY_LIMIT}}{{BROKER_MEMORY_LIMIT}}{{else}}512Mi{{/if}}"}},
              "volumeMounts": [{"name": "data", "mountPath": "/var/lib/broker"}, {"name": "messaging-cert", "mountPath": "/etc/amc-certs/messaging"}]
            }
          ],
          "volumes": [{"name": "messaging-cert", "secret": {"secretName": "{{MESSAGING_SECRET}}"}}]
        }
      }
    }
  },
  {
    "kind": "PersistentVolumeClaim",
    "metadata": {
      "name": "broker-data-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "broker-storage", "infraUuid": "{{INFRA_UUID}}", "infraType": "brokered"}
    },
    "spec": {
      "accessModes": ["ReadWriteOnce"],
      "resources": {"requests": {"storage": "{{#if BROKER_STORAGE_CAPACITY}}{{BROKER_STORAGE_CAPACITY}}{{else}}2Gi{{/if}}"}}
    }
  },
  {
    "kind": "Deployment",
    "metadata": {
      "name": "agent.{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "name": "agent", "role": "admin", "infraUuid": "{{INFRA_UUID}}", "infraType": "brokered"},
      "annotations": {"amc.io/address-space": "{{ADDRESS_SPACE}}", "amc.io/address-space-namespace": "{{ADDRESS_SPACE_NAMESPACE}}"}
    },
    "spec": {
      "replicas": 1,
      "template": {
        "metadata": {"labels": {"app": "openamc", "role": "admin", "infraUuid": "{{INFRA_UUID}}"}},
        "spec": {
          "containers": [
            {
              "name": "agent",
              "image": "openamc/agent:latest",
              "env": {
                "ADDRESS_SPACE": "{{ADDRESS_SPACE}}",
                "ADDRESS_SPACE_PLAN": "{{ADDRESS_SPACE_PLAN}}",
                "AUTHENTICATION_SERVICE_HOST": "{{AUTHENTICATION_SERVICE_HOST}}",
                "AUTHENTICATION_SERVICE_PORT": "{{AUTHENTICATION_SERVICE_PORT}}",
                "AUTHENTICATION_SERVICE_CA_CERT": "{{AUTHENTICATION_SERVICE_CA_CERT}}",
                {{#if CONSOLE_OAUTH_CLIENT_ID}}
                "CONSOLE_OAUTH_CLIENT_ID": "{{CONSOLE_OAUTH_CLIENT_ID}}",
                "CONSOLE_OAUTH_CLIENT_SECRET": "{{CONSOLE_OAUTH_CLIENT_SECRET}}",
                "CONSOLE_OAUTH_DISCOVERY_URL": "{{CONSOLE_OAUTH_DISCOVERY_URL}}",
                "CONSOLE_OAUTH_SCOPE": "{{CONSOLE_OAUTH_SCOPE}}",
                {{/if}}
                "AUTHENTICATION_SERVICE_SASL_INIT_HOST": "{{AUTHENTICATION_SERVICE_SASL_INIT_HOST}}"
              },
              "resources": {"limits": {"memory": "{{#if ADMIN_MEMORY_LIMIT}}{{ADMIN_MEMORY_LIMIT}}{{else}}512Mi{{/if}}"}},
              "volumeMounts": [{"name": "console-cert", "mountPath": "/etc/amc-certs/console"}]
            }
          ],
          "volumes": [{"name": "console-cert", "secret": {"secretName": "{{CONSOLE_SECRET}}"}}]
        }
      }
    }
  },
  {
    "kind": "Service",
    "metadata": {
      "name": "messaging-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "messaging", "infraUuid": "{{INFRA_UUID}}", "infraType": "brokered"},
      "annotations": {"amc.io/cert-secret": "{{MESSAGING_SECRET}}"}
    },
    "spec": {
      "ports": [{"name": "amqps", "port": 5671}],
      "selector": {"role": "broker", "infraUuid": "{{INFRA_UUID}}"}
    }
  },
  {
    "kind": "Service",
    "metadata": {
      "name": "console-{{INFRA_UUID}}",
      "namespace": "{{INFRA_NAMESPACE}}",
      "labels": {"app": "openamc", "role": "console", "infraUuid": "{{INFRA_UUID}}", "infraType": "brokered"},
      "annotations": {"amc.io/cert-secret": "{{CONSOLE_SECRET}}"}
    },
    "spec": {
      "ports": [{"name": "https", "port": 8443}],
      "selector": {"role": "admin", "infraUuid": "{{INFRA_UUID}}"}
    }
  }
]"#;
