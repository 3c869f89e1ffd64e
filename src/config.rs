//! Injector runtime configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::inject::CONFIG_SECRET_NAME;
use crate::{Error, Result, DEFAULT_WEBHOOK_PORT};

/// Default installer image for the `install-agent` init container
pub const DEFAULT_INSTALLER_IMAGE: &str = "docker.io/agent/installer:latest";

/// Default deadline for the namespace lookup when the caller sends none
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS material for the webhook listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsFiles {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Validated runtime configuration
#[derive(Clone, Debug)]
pub struct InjectorConfig {
    /// Address the webhook listens on
    pub listen_addr: SocketAddr,
    /// TLS files; plain HTTP when absent
    pub tls: Option<TlsFiles>,
    /// Namespace the operator runs in
    pub operator_namespace: String,
    /// Image of the installer init container
    pub installer_image: String,
    /// Namespace lookup deadline used when the request carries none
    pub lookup_timeout: Duration,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
            tls: None,
            operator_namespace: "agent-system".to_string(),
            installer_image: DEFAULT_INSTALLER_IMAGE.to_string(),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl InjectorConfig {
    /// Check the configuration before the server starts
    pub fn validate(&self) -> Result<()> {
        if self.operator_namespace.trim().is_empty() {
            return Err(Error::config("operator namespace must not be empty"));
        }
        if self.installer_image.trim().is_empty() {
            return Err(Error::config("installer image must not be empty"));
        }
        if self.lookup_timeout.is_zero() {
            return Err(Error::config("lookup timeout must be greater than zero"));
        }
        Ok(())
    }

    /// `namespace/name` of the secret mounted as the agent config volume
    pub fn config_secret_ref(&self) -> String {
        format!("{}/{}", self.operator_namespace, CONFIG_SECRET_NAME)
    }
}

/// Combine an optional certificate and key into [`TlsFiles`]
///
/// Both or neither must be given.
pub fn tls_files(cert: Option<PathBuf>, key: Option<PathBuf>) -> Result<Option<TlsFiles>> {
    match (cert, key) {
        (Some(cert), Some(key)) => Ok(Some(TlsFiles { cert, key })),
        (None, None) => Ok(None),
        _ => Err(Error::config(
            "TLS certificate and key must be provided together",
        )),
    }
}
