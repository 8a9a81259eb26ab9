pub mod config;
pub mod coordinator;
pub mod error;
pub mod grpc;
pub mod recovery;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod tls;
pub mod worker;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("scheduler");
}
