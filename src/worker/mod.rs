//! Worker side of the system.
//!
//! A worker holds one `ConnectWorker` stream open to the coordinator and
//! runs each job it receives, one at a time:
//!
//! 1. [`WorkerAgent`] announces itself with its id and declared capacity
//! 2. Each streamed job is handed to an [`Executor`]
//! 3. [`DockerExecutor`] logs in if the job carries registry credentials,
//!    pulls the image, and runs `sh -c <command>` in a throwaway container
//! 4. The outcome (stdout then stderr, and success) goes back via `CompleteJob`
//!
//! A failed report is logged and the worker keeps consuming its stream.

pub mod agent;
pub mod executor;

pub use agent::WorkerAgent;
pub use executor::{DockerExecutor, ExecutionResult, Executor};
