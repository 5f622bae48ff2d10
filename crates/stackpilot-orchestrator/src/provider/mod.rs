//! External collaborators the sequencer calls but does not implement.
//!
//! The core treats the container runtime, the database dump tool and the
//! certificate tool as injected trait objects. Production implementations
//! shell out to `docker compose`, `pg_dump`/`pg_isready` and `certbot`;
//! mock implementations live next to the traits for tests.

mod certbot;
mod compose;
mod postgres;

pub use certbot::CertbotProvider;
pub use compose::ComposeProvider;
pub use postgres::PgProvider;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::ServiceName;

/// Captured output of a command executed inside a service container.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code (-1 if terminated by signal).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ExecOutput {
    /// True if the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, for diagnostics.
    #[must_use]
    pub fn last_stderr_line(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
    }
}

/// Running/health status of one service as reported by the container
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name.
    pub name: String,
    /// Container state (running, exited, ...).
    pub state: String,
    /// Container health, if a healthcheck is defined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

/// Container lifecycle operations.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Build images for the given services (all if empty).
    async fn build(&self, services: &[ServiceName]) -> OrchestratorResult<()>;

    /// Start the given services (all if empty).
    async fn start(&self, services: &[ServiceName]) -> OrchestratorResult<()>;

    /// Stop the given services (all if empty).
    async fn stop(&self, services: &[ServiceName]) -> OrchestratorResult<()>;

    /// Stop and remove the given services, including their anonymous
    /// volumes.
    async fn remove(&self, services: &[ServiceName]) -> OrchestratorResult<()>;

    /// Run a command inside a service container.
    ///
    /// A non-zero exit is not an error here: the exit code is surfaced in
    /// the returned [`ExecOutput`] so probes can treat it as "not ready"
    /// rather than a sequencer crash. `Err` means the command could not be
    /// run at all.
    async fn exec(
        &self,
        service: &ServiceName,
        command: &[String],
        timeout: Duration,
    ) -> OrchestratorResult<ExecOutput>;

    /// Per-service running/health status.
    async fn ps(&self) -> OrchestratorResult<Vec<ServiceStatus>>;
}

/// Database dump operations, run against the stack's database.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Produce a full logical dump.
    async fn dump(&self) -> OrchestratorResult<Vec<u8>>;

    /// Check whether the database accepts connections.
    async fn is_ready(&self) -> OrchestratorResult<bool>;
}

/// Certificate issuance operations.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// Check whether a complete certificate artifact set exists for the
    /// domain.
    async fn has_valid_certificate(&self, domain: &str) -> OrchestratorResult<bool>;

    /// Issue a certificate for the domain.
    async fn issue(&self, domain: &str, email: &str) -> OrchestratorResult<()>;
}

fn join_names(services: &[ServiceName]) -> String {
    if services.is_empty() {
        "(all)".to_owned()
    } else {
        services
            .iter()
            .map(ServiceName::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Mock container provider for testing.
///
/// Records every lifecycle call in order so tests can assert restart
/// sequencing, and lets exec commands be scripted to fail a fixed number
/// of times before succeeding.
#[derive(Debug, Default)]
pub struct MockContainerProvider {
    calls: Mutex<Vec<String>>,
    // "<service> <argv0>" -> remaining failures before the exec succeeds.
    exec_failures: Mutex<HashMap<String, u32>>,
    fail_actions: Mutex<Vec<String>>,
}

impl MockContainerProvider {
    /// Ordered log of every lifecycle call made so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Make `exec` of `argv0` inside `service` fail `times` times before
    /// succeeding.
    pub fn fail_exec(&self, service: &str, argv0: &str, times: u32) {
        if let Ok(mut failures) = self.exec_failures.lock() {
            failures.insert(format!("{service} {argv0}"), times);
        }
    }

    /// Make every call of the named lifecycle action fail.
    pub fn fail_action(&self, action: &str) {
        if let Ok(mut actions) = self.fail_actions.lock() {
            actions.push(action.to_owned());
        }
    }

    fn record(&self, entry: String) -> OrchestratorResult<()> {
        self.calls
            .lock()
            .map_err(|_| OrchestratorError::internal("lock poisoned"))?
            .push(entry);
        Ok(())
    }

    fn lifecycle(&self, action: &str, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.record(format!("{action} {}", join_names(services)))?;

        let failing = self
            .fail_actions
            .lock()
            .map_err(|_| OrchestratorError::internal("lock poisoned"))?
            .iter()
            .any(|a| a == action);

        if failing {
            return Err(OrchestratorError::external(
                format!("docker compose {action}"),
                Some(1),
                "scripted failure",
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl ContainerProvider for MockContainerProvider {
    async fn build(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.lifecycle("build", services)
    }

    async fn start(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.lifecycle("start", services)
    }

    async fn stop(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.lifecycle("stop", services)
    }

    async fn remove(&self, services: &[ServiceName]) -> OrchestratorResult<()> {
        self.lifecycle("remove", services)
    }

    async fn exec(
        &self,
        service: &ServiceName,
        command: &[String],
        _timeout: Duration,
    ) -> OrchestratorResult<ExecOutput> {
        let argv0 = command.first().map(String::as_str).unwrap_or("");
        self.record(format!("exec {service} {}", command.join(" ")))?;

        let mut failures = self
            .exec_failures
            .lock()
            .map_err(|_| OrchestratorError::internal("lock poisoned"))?;

        let key = format!("{service} {argv0}");
        if let Some(remaining) = failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Ok(ExecOutput {
                    exit_code: 1,
                    stdout: String::new(),
                    stderr: "scripted failure: not ready\n".to_owned(),
                });
            }
        }

        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn ps(&self) -> OrchestratorResult<Vec<ServiceStatus>> {
        self.record("ps".to_owned())?;
        Ok(Vec::new())
    }
}

/// Mock database provider for testing.
#[derive(Debug, Default)]
pub struct MockDatabaseProvider {
    fail_dump: AtomicBool,
    not_ready: AtomicBool,
}

impl MockDatabaseProvider {
    /// Make every subsequent dump fail.
    pub fn set_fail_dump(&self, fail: bool) {
        self.fail_dump.store(fail, Ordering::SeqCst);
    }

    /// Make the database report not ready.
    pub fn set_not_ready(&self, not_ready: bool) {
        self.not_ready.store(not_ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseProvider for MockDatabaseProvider {
    async fn dump(&self) -> OrchestratorResult<Vec<u8>> {
        if self.fail_dump.load(Ordering::SeqCst) {
            return Err(OrchestratorError::external(
                "pg_dump",
                Some(1),
                "scripted dump failure",
            ));
        }
        Ok(b"-- PostgreSQL database dump\n".to_vec())
    }

    async fn is_ready(&self) -> OrchestratorResult<bool> {
        Ok(!self.not_ready.load(Ordering::SeqCst))
    }
}

/// Mock certificate provider for testing.
#[derive(Debug, Default)]
pub struct MockCertificateProvider {
    valid: AtomicBool,
    issued: Mutex<Vec<String>>,
}

impl MockCertificateProvider {
    /// Pretend a valid certificate exists.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Domains issue() was called for.
    pub fn issued(&self) -> Vec<String> {
        self.issued.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CertificateProvider for MockCertificateProvider {
    async fn has_valid_certificate(&self, _domain: &str) -> OrchestratorResult<bool> {
        Ok(self.valid.load(Ordering::SeqCst))
    }

    async fn issue(&self, domain: &str, _email: &str) -> OrchestratorResult<()> {
        self.issued
            .lock()
            .map_err(|_| OrchestratorError::internal("lock poisoned"))?
            .push(domain.to_owned());
        self.valid.store(true, Ordering::SeqCst);
        Ok(())
    }
}
