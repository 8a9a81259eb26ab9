pub mod convert;
pub mod coordinator_service;
pub mod server;
pub mod session;

pub use coordinator_service::CoordinatorService;
pub use server::GrpcServer;
pub use session::{ChannelSink, JobSink, SessionEnd, WorkerSession};

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::config::TlsConfig;
use crate::error::Result;
use crate::tls::{self, TlsIdentity};

/// Open a channel to the coordinator at `addr` (host:port, or a full URI).
/// The scheme follows whether a TLS identity is supplied.
pub async fn connect(
    addr: &str,
    tls_identity: Option<&TlsIdentity>,
    timeout: Option<Duration>,
) -> Result<Channel> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else if tls_identity.is_some() {
        format!("https://{}", addr)
    } else {
        format!("http://{}", addr)
    };

    let mut endpoint = Endpoint::from_shared(uri)?;
    if let Some(timeout) = timeout {
        endpoint = endpoint.connect_timeout(timeout).timeout(timeout);
    }
    if let Some(tls_identity) = tls_identity {
        endpoint = endpoint.tls_config(tls_identity.client_tls_config())?;
    }

    Ok(endpoint.connect().await?)
}

/// Like [`connect`], resolving the TLS identity from `config` first. An
/// unusable TLS setup is an error unless `allow_insecure` is set.
pub async fn connect_with_config(
    addr: &str,
    config: &TlsConfig,
    timeout: Option<Duration>,
) -> Result<Channel> {
    let tls_identity = tls::resolve_identity(config).await?;
    connect(addr, tls_identity.as_ref(), timeout).await
}
