//! TLS utilities for loading certificates and configuring mTLS.
//!
//! The coordinator serves with a [`ServerTlsConfig`] that requires client
//! certificates; workers and CLI clients connect with a [`ClientTlsConfig`]
//! that presents their own.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("TLS enabled but missing required paths (--ca-cert, --cert, --key)")]
    Incomplete,

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Name clients expect on the coordinator certificate. Coordinators are
/// reached by IP as often as by hostname, so trust rests on the CA.
pub const COORDINATOR_DOMAIN: &str = "epoch-coordinator";

/// Loaded TLS materials ready for use with tonic.
///
/// Contains this process's identity (certificate + private key) and the CA
/// certificate used to verify the other side.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
    /// CA certificate for verifying peers
    ca_cert: Certificate,
}

impl TlsIdentity {
    /// Load TLS materials from the paths in `config`.
    ///
    /// Fails if a path is unset or a file is missing or unreadable.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert_path = config
            .ca_cert_path
            .as_ref()
            .ok_or(TlsError::MissingCaCert)?;
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        if !ca_cert_path.exists() {
            return Err(TlsError::CaCertNotFound(ca_cert_path.clone()));
        }
        if !cert_path.exists() {
            return Err(TlsError::CertNotFound(cert_path.clone()));
        }
        if !key_path.exists() {
            return Err(TlsError::KeyNotFound(key_path.clone()));
        }

        let ca_pem = fs::read(ca_cert_path).await?;
        let cert_pem = fs::read(cert_path).await?;
        let key_pem = fs::read(key_path).await?;

        let ca_cert = Certificate::from_pem(ca_pem);
        let identity = Identity::from_pem(cert_pem, key_pem);

        Ok(Self { identity, ca_cert })
    }

    /// Server config for the coordinator listener. Clients must present a
    /// certificate signed by the CA.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity.clone())
            .client_ca_root(self.ca_cert.clone())
    }

    /// Client config for workers and CLI commands dialing the coordinator.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .domain_name(COORDINATOR_DOMAIN)
            .ca_certificate(self.ca_cert.clone())
            .identity(self.identity.clone())
    }
}

/// Decide whether to run with TLS, honoring `allow_insecure`.
///
/// Returns `None` when TLS is disabled, or when it is enabled but unusable
/// and insecure fallback is allowed.
pub async fn resolve_identity(config: &TlsConfig) -> Result<Option<TlsIdentity>, TlsError> {
    if !config.enabled {
        return Ok(None);
    }

    if !config.is_complete() {
        if config.allow_insecure {
            tracing::warn!("TLS enabled but certificate paths incomplete, running in insecure mode");
            return Ok(None);
        }
        return Err(TlsError::Incomplete);
    }

    match TlsIdentity::load(config).await {
        Ok(identity) => {
            tracing::info!("TLS enabled with mTLS authentication");
            Ok(Some(identity))
        }
        Err(e) if config.allow_insecure => {
            tracing::warn!(error = %e, "TLS certificate loading failed, running in insecure mode");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
