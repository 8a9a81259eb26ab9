use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::{DEFAULT_QUEUE_CAPACITY, DEFAULT_TICK_INTERVAL};

/// Resource limits the worker applies to every container it starts.
///
/// The image itself comes from each job.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Disable network access in container
    pub network_disabled: bool,
    /// Memory limit (e.g., "256m")
    pub memory_limit: Option<String>,
    /// CPU limit (e.g., "0.5" for half a CPU)
    pub cpu_limit: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            network_disabled: false,
            memory_limit: Some("256m".to_string()),
            cpu_limit: Some("0.5".to_string()),
        }
    }
}

/// TLS configuration for the coordinator listener and its clients.
///
/// When enabled, all gRPC communication uses mutual TLS (mTLS):
/// - The coordinator presents its certificate and verifies client certificates
/// - Workers and CLI clients present theirs and verify the coordinator's
/// - Both sides must have certificates signed by the same CA
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    /// Used to verify peer certificates.
    pub ca_cert_path: Option<PathBuf>,

    /// Path to this process's certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to this process's private key (PEM format).
    /// Must match the certificate.
    pub key_path: Option<PathBuf>,

    /// Allow insecure connections for development/testing.
    /// When true and TLS files are missing, runs in plaintext mode with warning.
    /// When false and TLS files are missing, fails to start.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled
            && self.ca_cert_path.is_some()
            && self.cert_path.is_some()
            && self.key_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// redb database file holding job records.
    pub db_path: PathBuf,
    pub queue_capacity: usize,
    pub tick_interval_ms: u64,
    /// Offer one-off jobs to the dispatch queue as soon as they are submitted
    /// instead of waiting for the next tick.
    pub dispatch_on_submit: bool,
    pub tls: TlsConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            db_path: PathBuf::from("epoch.redb"),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            dispatch_on_submit: false,
            tls: TlsConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(listen_addr: SocketAddr, db_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// host:port of the coordinator, supports both IP and hostnames
    pub coordinator_addr: String,
    /// Declared to the coordinator on connect. Jobs still run one at a time.
    pub capacity: u32,
    pub sandbox: SandboxConfig,
    pub tls: TlsConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            coordinator_addr: "127.0.0.1:50051".to_string(),
            capacity: 1,
            sandbox: SandboxConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, coordinator_addr: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            coordinator_addr: coordinator_addr.into(),
            ..Default::default()
        }
    }
}
