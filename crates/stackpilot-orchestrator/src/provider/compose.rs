//! Container lifecycle provider backed by the Docker Compose CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::{ContainerProvider, ExecOutput, ServiceStatus};
use crate::types::ServiceName;

/// Invokes `docker compose` with an explicit compose file and project name.
///
/// Every invocation carries a timeout; the provider never waits on the
/// Compose CLI unboundedly.
#[derive(Debug, Clone)]
pub struct ComposeProvider {
    compose_file: PathBuf,
    project_name: String,
    command_timeout: Duration,
}

impl ComposeProvider {
    /// Create a provider for the configured project.
    ///
    /// Fails if the `docker` binary is not on the PATH.
    pub fn new(project: &ProjectConfig) -> OrchestratorResult<Self> {
        if which::which("docker").is_err() {
            return Err(OrchestratorError::config(
                "docker not found on PATH; install Docker or adjust PATH",
            ));
        }

        Ok(Self {
            compose_file: project.compose_file.clone(),
            project_name: project.name.clone(),
            command_timeout: Duration::from_secs(project.command_timeout_secs),
        })
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "compose".to_owned(),
            "-f".to_owned(),
            self.compose_file.display().to_string(),
            "-p".to_owned(),
            self.project_name.clone(),
        ]
    }

    async fn run(&self, args: Vec<String>, timeout: Duration) -> OrchestratorResult<ExecOutput> {
        let command_line = format!("docker {}", args.join(" "));
        debug!(command = %command_line, "running compose command");

        let mut command = Command::new("docker");
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                OrchestratorError::external(
                    command_line.clone(),
                    None,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| OrchestratorError::external(command_line.clone(), None, e.to_string()))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a lifecycle verb, treating a non-zero exit as an error.
    async fn run_ok(&self, verb_args: Vec<String>) -> OrchestratorResult<()> {
        let mut args = self.base_args();
        args.extend(verb_args);
        let command_line = format!("docker {}", args.join(" "));

        let output = self.run(args, self.command_timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(OrchestratorError::external(
                command_line,
                Some(output.exit_code),
                output.last_stderr_line().to_owned(),
            ))
        }
    }
}

fn with_services(verb: &[&str], services: &[ServiceName]) -> Vec<String> {
    verb.iter()
        .map(|s| (*s).to_owned())
        .chain(services.iter().map(|s| s.as_str().to_owned()))
        .collect()
}

// `docker compose ps --format json` emits one JSON object per line.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Health")]
    health: Option<String>,
}

#[async_trait]
impl ContainerProvider for ComposeProvider {
    async fn build(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.run_ok(with_services(&["build"], services)).await
    }

    async fn start(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.run_ok(with_services(&["up", "-d", "--no-deps"], services))
            .await
    }

    async fn stop(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.run_ok(with_services(&["stop"], services)).await
    }

    async fn remove(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        // -s stops first, -v removes anonymous volumes.
        self.run_ok(with_services(&["rm", "-f", "-s", "-v"], services))
            .await
    }

    async fn exec(
        &self,
        service: &ServiceName,
        command: &[String],
        timeout: Duration,
    ) -> OrchestratorResult<ExecOutput> {
        let mut args = self.base_args();
        args.extend(["exec".to_owned(), "-T".to_owned(), service.to_string()]);
        args.extend(command.iter().cloned());
        self.run(args, timeout).await
    }

    async fn ps(&self) -> OrchestratorResult<Vec<ServiceStatus>> {
        let mut args = self.base_args();
        args.extend(["ps", "-a", "--format", "json"].map(str::to_owned));
        let command_line = format!("docker {}", args.join(" "));

        let output = self.run(args, self.command_timeout).await?;
        if !output.success() {
            return Err(OrchestratorError::external(
                command_line,
                Some(output.exit_code),
                output.last_stderr_line().to_owned(),
            ));
        }

        let mut statuses = Vec::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<PsEntry>(line) {
                Ok(entry) => statuses.push(ServiceStatus {
                    name: entry.service,
                    state: entry.state,
                    health: entry.health,
                }),
                Err(e) => debug!(error = %e, "skipping unparseable ps line"),
            }
        }

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_args_include_services() {
        let args = with_services(
            &["up", "-d", "--no-deps"],
            &[ServiceName::new("api"), ServiceName::new("celery")],
        );
        assert_eq!(args, vec!["up", "-d", "--no-deps", "api", "celery"]);
    }

    #[test]
    fn verb_args_without_services_target_all() {
        let args = with_services(&["stop"], &[]);
        assert_eq!(args, vec!["stop"]);
    }

    #[test]
    fn ps_entry_parses_compose_output() {
        let line = r#"{"Service":"db","State":"running","Health":"healthy","Name":"stack-db-1"}"#;
        let entry: PsEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.service, "db");
        assert_eq!(entry.state, "running");
        assert_eq!(entry.health.as_deref(), Some("healthy"));
    }
}
