use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::scheduler::{Job, RegistryCredentials};

/// Outcome of running one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    /// stdout followed by stderr.
    pub output: String,
}

impl ExecutionResult {
    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs a job's command inside its image.
#[tonic::async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionResult;
}

/// Executes jobs in Docker containers through the `docker` CLI.
///
/// Each run:
/// - logs in first when the job carries registry credentials
/// - pulls the job's image
/// - runs `sh -c <command>` in a throwaway container with the sandbox limits
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    config: SandboxConfig,
    docker: String,
}

impl DockerExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            docker: "docker".to_string(),
        }
    }

    /// Use a different docker-compatible binary (e.g. `podman`).
    pub fn with_binary(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    /// Arguments for `docker run`.
    pub fn run_args(&self, job: &Job) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if self.config.network_disabled {
            args.push("--network=none".to_string());
        }
        if let Some(ref limit) = self.config.memory_limit {
            args.push(format!("--memory={}", limit));
        }
        if let Some(ref limit) = self.config.cpu_limit {
            args.push(format!("--cpus={}", limit));
        }

        args.push("--security-opt=no-new-privileges".to_string());

        args.push(job.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(job.command.clone());
        args
    }

    /// Arguments for `docker login`. The password goes over stdin.
    pub fn login_args(creds: &RegistryCredentials) -> Vec<String> {
        let mut args = vec![
            "login".to_string(),
            "--username".to_string(),
            creds.username.clone(),
            "--password-stdin".to_string(),
        ];
        if !creds.server.is_empty() {
            args.push(creds.server.clone());
        }
        args
    }

    async fn login(&self, creds: &RegistryCredentials) -> Result<(), String> {
        let mut child = Command::new(&self.docker)
            .args(Self::login_args(creds))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to start docker login: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(creds.password.as_bytes())
                .await
                .map_err(|e| format!("failed to pass registry password: {}", e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("docker login failed: {}", e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "docker login failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    async fn pull(&self, image: &str) -> Result<(), String> {
        let output = Command::new(&self.docker)
            .args(["pull", "--quiet", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| format!("failed to start docker pull: {}", e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "docker pull {} failed: {}",
                image,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    fn process_output(
        job_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let exit_code = output.status.code();
                let success = output.status.success();

                tracing::info!(job_id, success, exit_code = ?exit_code, "Job finished");

                if !success && combined.is_empty() {
                    combined = format!("Exit code: {:?}", exit_code);
                }
                ExecutionResult {
                    success,
                    output: combined,
                }
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Job execution failed");
                ExecutionResult::failed(e.to_string())
            }
        }
    }
}

#[tonic::async_trait]
impl Executor for DockerExecutor {
    async fn execute(&self, job: &Job) -> ExecutionResult {
        tracing::info!(job_id = %job.id, command = %job.command, image = %job.image, "Executing job");

        if let Some(ref creds) = job.registry {
            if let Err(e) = self.login(creds).await {
                tracing::warn!(job_id = %job.id, registry = %creds.server, error = %e, "Registry login failed");
                return ExecutionResult::failed(e);
            }
        }

        if let Err(e) = self.pull(&job.image).await {
            tracing::warn!(job_id = %job.id, error = %e, "Image pull failed");
            return ExecutionResult::failed(e);
        }

        let result = Command::new(&self.docker)
            .args(self.run_args(job))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(&job.id, result)
    }
}
