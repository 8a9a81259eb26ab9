use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::error::{EpochError, Result};
use crate::grpc::coordinator_service::CoordinatorService;
use crate::proto::scheduler_server::SchedulerServer;
use crate::tls::TlsIdentity;

pub struct GrpcServer {
    listener: TcpListener,
    service: CoordinatorService,
    tls_identity: Option<TlsIdentity>,
}

impl GrpcServer {
    /// Bind the listening socket. Failing to bind is fatal for the
    /// coordinator, so it happens before anything else is started.
    pub async fn bind(
        addr: SocketAddr,
        service: CoordinatorService,
        tls_identity: Option<TlsIdentity>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EpochError::Bind { addr, source })?;
        Ok(Self {
            listener,
            service,
            tls_identity,
        })
    }

    /// Address actually bound, useful when the configured port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| EpochError::Internal(format!("failed to read local address: {}", e)))
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        let mut builder = Server::builder();
        if let Some(ref tls_identity) = self.tls_identity {
            builder = builder.tls_config(tls_identity.server_tls_config())?;
        }

        tracing::info!(addr = %addr, tls = self.tls_identity.is_some(), "Starting gRPC server");

        builder
            .add_service(SchedulerServer::new(self.service))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(self.listener),
                shutdown.cancelled_owned(),
            )
            .await?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}
