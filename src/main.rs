use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use epoch::config::{CoordinatorConfig, SandboxConfig, TlsConfig, WorkerConfig};
use epoch::coordinator::Coordinator;
use epoch::grpc::{self, convert::status_name};
use epoch::proto::scheduler_client::SchedulerClient;
use epoch::proto::{
    GetJobStatusRequest, JobStatus, ListJobsRequest, RegistryCredentials, SubmitJobRequest,
};
use epoch::shutdown::install_shutdown_handler;
use epoch::worker::WorkerAgent;

/// Deadline for each client call.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "epoch")]
#[command(version)]
#[command(about = "A distributed job scheduler that streams due jobs to Docker workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Server(ServerArgs),

    /// Start a worker that runs jobs from the coordinator
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// TLS Arguments (shared by every command)
// =============================================================================

#[derive(Parser, Debug)]
struct TlsArgs {
    /// Enable mutual TLS
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to this process's certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to this process's private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Fall back to plaintext when --tls is given but certificates are unusable.
    /// Useful for development. NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,
}

impl TlsArgs {
    fn to_config(&self) -> TlsConfig {
        TlsConfig {
            enabled: self.tls,
            ca_cert_path: self.ca_cert.clone(),
            cert_path: self.cert.clone(),
            key_path: self.key.clone(),
            allow_insecure: self.allow_insecure,
        }
    }
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to listen on for gRPC
    #[arg(long, default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Path of the job database file
    #[arg(long, default_value = "epoch.redb")]
    db_path: PathBuf,

    /// Maximum number of jobs waiting for a worker
    #[arg(long, default_value = "100")]
    queue_capacity: usize,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_interval_ms: u64,

    /// Dispatch one-off jobs at submit time instead of on the next tick
    #[arg(long)]
    dispatch_on_submit: bool,

    #[command(flatten)]
    tls: TlsArgs,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Worker ID (generated when omitted)
    #[arg(long)]
    worker_id: Option<String>,

    /// Coordinator address (host:port)
    #[arg(long, default_value = "127.0.0.1:50051")]
    coordinator: String,

    /// Capacity announced to the coordinator
    #[arg(long, default_value = "1")]
    capacity: u32,

    /// Run containers without network access
    #[arg(long)]
    no_network: bool,

    /// Container memory limit (e.g. "256m")
    #[arg(long, default_value = "256m")]
    memory: String,

    /// Container CPU limit (e.g. "0.5")
    #[arg(long, default_value = "0.5")]
    cpus: String,

    #[command(flatten)]
    tls: TlsArgs,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator address (host:port, or a full http:// / https:// URI)
    #[arg(long, short = 'a', default_value = "127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    tls: TlsArgs,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum StatusFilter {
    Queued,
    Running,
    Completed,
    Failed,
}

impl From<StatusFilter> for JobStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Queued => JobStatus::Queued,
            StatusFilter::Running => JobStatus::Running,
            StatusFilter::Completed => JobStatus::Completed,
            StatusFilter::Failed => JobStatus::Failed,
        }
    }
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job
    Submit {
        /// The command to run inside the image (e.g., "echo hello")
        command: String,

        /// Container image to run the command in
        #[arg(long, short = 'i')]
        image: String,

        /// Job ID (generated by the coordinator when omitted)
        #[arg(long)]
        id: Option<String>,

        /// "once" (or -1) to run a single time, or an interval in seconds
        #[arg(long, short = 's', default_value = "once", allow_hyphen_values = true)]
        schedule: String,

        /// Registry username for private images
        #[arg(long, requires = "registry_password")]
        registry_user: Option<String>,

        /// Registry password for private images
        #[arg(long, requires = "registry_user")]
        registry_password: Option<String>,

        /// Registry server (defaults to Docker Hub)
        #[arg(long, requires = "registry_user")]
        registry_server: Option<String>,
    },
    /// Get status of a specific job
    Status {
        /// The job ID
        job_id: String,
    },
    /// List all jobs
    List {
        /// Only show jobs in this state
        #[arg(long)]
        status: Option<StatusFilter>,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    accepted: bool,
    message: String,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    status: String,
    schedule: String,
    output: String,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    status: String,
    schedule: String,
    image: String,
    command: String,
}

#[derive(Serialize)]
struct JobListOutput {
    jobs: Vec<JobListItem>,
    total_count: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn create_client_channel(args: &ClientArgs) -> Result<Channel, Box<dyn std::error::Error>> {
    Ok(grpc::connect_with_config(&args.addr, &args.tls.to_config(), Some(CLIENT_TIMEOUT)).await?)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

// =============================================================================
// Server and Worker
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = CoordinatorConfig {
        listen_addr: args.listen,
        db_path: args.db_path,
        queue_capacity: args.queue_capacity,
        tick_interval_ms: args.tick_interval_ms,
        dispatch_on_submit: args.dispatch_on_submit,
        tls: args.tls.to_config(),
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        db_path = %config.db_path.display(),
        queue_capacity = config.queue_capacity,
        tls_requested = config.tls.enabled,
        "Starting epoch coordinator"
    );

    let shutdown = install_shutdown_handler()?;
    let coordinator = match Coordinator::open(config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open job store");
            return Err(e.into());
        }
    };
    if let Err(e) = coordinator.run(shutdown).await {
        tracing::error!(error = %e, "Coordinator failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = WorkerConfig::new(
        args.worker_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        args.coordinator,
    );
    config.capacity = args.capacity;
    config.sandbox = SandboxConfig {
        network_disabled: args.no_network,
        memory_limit: Some(args.memory),
        cpu_limit: Some(args.cpus),
    };
    config.tls = args.tls.to_config();

    tracing::info!(
        worker_id = %config.worker_id,
        coordinator = %config.coordinator_addr,
        "Starting epoch worker"
    );

    let shutdown = install_shutdown_handler()?;
    let executed = WorkerAgent::new(config).run(shutdown).await?;
    tracing::info!(executed, "Worker stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_submit(
    client: &mut SchedulerClient<Channel>,
    request: SubmitJobRequest,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let resp = match client.submit_job(request).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: Job submission failed: {}", status.message());
            std::process::exit(1);
        }
    };

    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_id: resp.id,
                accepted: resp.accepted,
                message: resp.message,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{}", resp.message);
            println!("Job ID: {}", resp.id);
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &mut SchedulerClient<Channel>,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = match client
        .get_job_status(GetJobStatusRequest {
            job_id: job_id.clone(),
        })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) if status.code() == tonic::Code::NotFound => {
            eprintln!("Error: Job {} not found", job_id);
            std::process::exit(1);
        }
        Err(status) => return Err(status.into()),
    };

    match output_format {
        OutputFormat::Json => {
            let output = JobStatusOutput {
                job_id: response.job_id,
                status: status_name(response.status),
                schedule: response.schedule,
                output: response.output,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job ID:   {}", response.job_id);
            println!("Status:   {}", status_name(response.status));
            println!("Schedule: {}", response.schedule);
            if !response.output.is_empty() {
                println!("Output:");
                for line in response.output.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &mut SchedulerClient<Channel>,
    status: Option<StatusFilter>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let status_filter = status.map(JobStatus::from).unwrap_or(JobStatus::Unspecified);
    let response = client
        .list_jobs(ListJobsRequest {
            status_filter: status_filter.into(),
        })
        .await?
        .into_inner();

    let jobs: Vec<JobListItem> = response
        .jobs
        .into_iter()
        .map(|job| JobListItem {
            job_id: job.job_id,
            status: status_name(job.status),
            schedule: job.schedule,
            image: job.image,
            command: job.command,
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            let output = JobListOutput {
                total_count: jobs.len(),
                jobs,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<38} {:<10} {:<10} {:<20} COMMAND",
                    "JOB ID", "STATUS", "SCHEDULE", "IMAGE"
                );
                println!("{}", "-".repeat(100));

                for job in &jobs {
                    println!(
                        "{:<38} {:<10} {:<10} {:<20} {}",
                        truncate(&job.job_id, 38),
                        job.status,
                        truncate(&job.schedule, 10),
                        truncate(&job.image, 20),
                        truncate(&job.command, 20)
                    );
                }
                println!();
                println!("{} jobs", jobs.len());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Job { client, command } => {
            let channel = create_client_channel(&client).await?;
            let mut grpc_client = SchedulerClient::new(channel);

            match command {
                JobCommands::Submit {
                    command: cmd,
                    image,
                    id,
                    schedule,
                    registry_user,
                    registry_password,
                    registry_server,
                } => {
                    let registry = registry_user.map(|username| RegistryCredentials {
                        username,
                        password: registry_password.unwrap_or_default(),
                        server: registry_server.unwrap_or_default(),
                    });
                    let request = SubmitJobRequest {
                        id: id.unwrap_or_default(),
                        command: cmd,
                        image,
                        schedule,
                        registry,
                    };
                    handle_job_submit(&mut grpc_client, request, &client.output).await?;
                }
                JobCommands::Status { job_id } => {
                    handle_job_status(&mut grpc_client, job_id, &client.output).await?;
                }
                JobCommands::List { status } => {
                    handle_job_list(&mut grpc_client, status, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
