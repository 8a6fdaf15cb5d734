// ── Runtime connection configuration ──
//
// These types describe *how* to reach a controller. They carry credential
// data and connection tuning, but never touch disk. The CLI constructs a
// `ControllerConfig` from arguments and environment and hands it in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use sastre_api::{Rest, TlsMode, TransportConfig};

use crate::error::TaskError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Default -- controllers ship self-signed certs.
    #[default]
    DangerAcceptInvalid,
}

/// Configuration for connecting to a single controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller base URL (e.g., `https://vmanage.example.com:8443`).
    pub url: Url,
    pub username: String,
    pub password: SecretString,
    /// Tenant name for multi-tenant controllers.
    pub tenant: Option<String>,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ControllerConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            username: username.into(),
            password,
            tenant: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Open an authenticated session to the controller.
    pub async fn connect(&self) -> Result<Rest, TaskError> {
        let transport = TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
            cookie_jar: None,
        };

        Ok(Rest::connect(
            self.url.clone(),
            &self.username,
            self.password.expose_secret(),
            self.tenant.as_deref(),
            &transport,
        )
        .await?)
    }
}
