use thiserror::Error;

use crate::store::StoreError;
use crate::tls::TlsError;

#[derive(Error, Debug)]
pub enum EpochError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<EpochError> for tonic::Status {
    fn from(err: EpochError) -> Self {
        match err {
            EpochError::JobNotFound(id) => tonic::Status::not_found(format!("Job not found: {}", id)),
            EpochError::InvalidJob(msg) => tonic::Status::invalid_argument(msg),
            EpochError::GrpcError(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EpochError>;
