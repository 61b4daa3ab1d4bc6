//! External Dependency Descriptors: Authentication and Console Services

use serde::{Deserialize, Serialize};

/// Authentication service referenced by address spaces.
///
/// Synthesis requires the status to be populated; until then the space is
/// blocked with a DependencyNotReady condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationService {
    /// Service name
    pub name: String,
    /// SASL realm; falls back to the space's realm annotation when absent
    pub realm: Option<String>,
    /// OAuth URL published by the service
    pub oauth_url: Option<String>,
    /// Deployment status, absent until the service is up
    pub status: Option<AuthServiceStatus>,
}

impl AuthenticationService {
    /// Create a descriptor without status (not yet deployed)
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            realm: None,
            oauth_url: None,
            status: None,
        }
    }
}

/// Populated once the authentication service is deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServiceStatus {
    /// Reachable host
    pub host: String,
    /// Reachable port
    pub port: u16,
    /// Secret holding the CA certificate ("tls.crt" entry)
    pub ca_cert_secret: Option<String>,
    /// Secret holding the client certificate, when mutual TLS is required
    pub client_cert_secret: Option<String>,
}

/// Console service providing OAuth parameters for the per-space console.
///
/// Console wiring is best-effort: a missing service or unreadable OAuth
/// secret degrades the console only, never the space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleService {
    /// Service name
    pub name: String,
    /// OAuth discovery document URL
    pub discovery_metadata_url: Option<String>,
    /// OAuth scope
    pub scope: Option<String>,
    /// Secret holding "client-id" and "client-secret" entries
    pub oauth_client_secret: Option<String>,
}

impl ConsoleService {
    /// Create a console service descriptor
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            discovery_metadata_url: None,
            scope: None,
            oauth_client_secret: None,
        }
    }
}
