//! Readiness probing with bounded retries.
//!
//! A [`Probe`] describes how to test one service's readiness; [`HealthProbe`]
//! executes probes. Every wait is attempt-bounded: `max_attempts * interval`
//! is the worst-case wait, and exhausting it yields [`WaitOutcome::TimedOut`]
//! rather than an error, so callers decide per step whether a timeout is
//! fatal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::ContainerProvider;
use crate::types::ServiceName;

/// How a probe tests readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect to `target` (host:port).
    Tcp,
    /// HTTP GET against `target` (URL); 2xx means ready.
    HttpGet,
    /// Run `target` as a command inside the service container; exit 0 means
    /// ready.
    Exec,
}

/// Describes how to test one service's readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    /// Probe mechanism.
    pub kind: ProbeKind,

    /// Address, URL or command, depending on `kind`.
    pub target: String,

    /// Timeout for a single check in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Spacing between checks in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of checks before giving up. Must be at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_interval_secs() -> u64 {
    2
}

const fn default_max_attempts() -> u32 {
    30
}

impl Probe {
    /// Create a TCP probe with default timing.
    #[must_use]
    pub fn tcp(target: impl Into<String>) -> Self {
        Self::with_kind(ProbeKind::Tcp, target)
    }

    /// Create an HTTP GET probe with default timing.
    #[must_use]
    pub fn http_get(target: impl Into<String>) -> Self {
        Self::with_kind(ProbeKind::HttpGet, target)
    }

    /// Create an exec probe with default timing.
    #[must_use]
    pub fn exec(target: impl Into<String>) -> Self {
        Self::with_kind(ProbeKind::Exec, target)
    }

    fn with_kind(kind: ProbeKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            timeout_secs: default_timeout_secs(),
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }

    /// Timeout for a single check.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Spacing between checks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate the probe descriptor.
    pub fn validate(&self, service: &ServiceName) -> OrchestratorResult<()> {
        if self.max_attempts < 1 {
            return Err(OrchestratorError::config(format!(
                "probe for {service} must allow at least one attempt"
            )));
        }
        if self.target.trim().is_empty() {
            return Err(OrchestratorError::config(format!(
                "probe for {service} has an empty target"
            )));
        }
        Ok(())
    }
}

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The service answered the probe.
    Ready,
    /// The service did not answer, with the failure reason.
    NotReady(String),
    /// The probe itself could not run (spawn failure, provider error).
    Error(String),
}

impl CheckOutcome {
    /// True if the check found the service ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    fn reason(&self) -> &str {
        match self {
            Self::Ready => "ready",
            Self::NotReady(reason) | Self::Error(reason) => reason,
        }
    }
}

/// Result of a bounded readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The service became ready.
    Ready {
        /// Number of checks performed, including the successful one.
        attempts: u32,
    },
    /// All attempts were exhausted without the service becoming ready.
    TimedOut {
        /// Number of checks performed.
        attempts: u32,
        /// Failure reason from the last check.
        last_failure: String,
    },
}

impl WaitOutcome {
    /// True if the service became ready within the attempt budget.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Executes probes against running services.
pub struct HealthProbe {
    container: Arc<dyn ContainerProvider>,
    http: reqwest::Client,
}

impl HealthProbe {
    /// Create a new health probe runner.
    #[must_use]
    pub fn new(container: Arc<dyn ContainerProvider>) -> Self {
        Self {
            container,
            http: reqwest::Client::new(),
        }
    }

    /// Perform a single readiness check. Never blocks longer than the
    /// probe's timeout.
    pub async fn check(&self, service: &ServiceName, probe: &Probe) -> CheckOutcome {
        match probe.kind {
            ProbeKind::Tcp => self.check_tcp(probe).await,
            ProbeKind::HttpGet => self.check_http(probe).await,
            ProbeKind::Exec => self.check_exec(service, probe).await,
        }
    }

    /// Loop [`Self::check`] at `interval` spacing, up to `max_attempts`.
    ///
    /// Returns [`WaitOutcome::TimedOut`] once attempts are exhausted; the
    /// caller decides whether that is fatal. Sleeps between attempts, not
    /// after the last one.
    pub async fn wait_until_ready(&self, service: &ServiceName, probe: &Probe) -> WaitOutcome {
        let mut last_failure = String::new();

        for attempt in 1..=probe.max_attempts {
            let outcome = self.check(service, probe).await;
            if outcome.is_ready() {
                debug!(service = %service, attempt, "service ready");
                return WaitOutcome::Ready { attempts: attempt };
            }

            last_failure = outcome.reason().to_owned();
            debug!(
                service = %service,
                attempt,
                max_attempts = probe.max_attempts,
                reason = %last_failure,
                "service not ready yet"
            );

            if attempt < probe.max_attempts {
                tokio::time::sleep(probe.interval()).await;
            }
        }

        WaitOutcome::TimedOut {
            attempts: probe.max_attempts,
            last_failure,
        }
    }

    async fn check_tcp(&self, probe: &Probe) -> CheckOutcome {
        let connect = tokio::net::TcpStream::connect(&probe.target);
        match tokio::time::timeout(probe.timeout(), connect).await {
            Ok(Ok(_)) => CheckOutcome::Ready,
            Ok(Err(e)) => CheckOutcome::NotReady(format!("connect {}: {e}", probe.target)),
            Err(_) => CheckOutcome::NotReady(format!(
                "connect {} timed out after {}s",
                probe.target, probe.timeout_secs
            )),
        }
    }

    async fn check_http(&self, probe: &Probe) -> CheckOutcome {
        let request = self.http.get(&probe.target).timeout(probe.timeout());
        match request.send().await {
            Ok(response) if response.status().is_success() => CheckOutcome::Ready,
            Ok(response) => CheckOutcome::NotReady(format!(
                "GET {} returned {}",
                probe.target,
                response.status()
            )),
            Err(e) => CheckOutcome::NotReady(format!("GET {}: {e}", probe.target)),
        }
    }

    async fn check_exec(&self, service: &ServiceName, probe: &Probe) -> CheckOutcome {
        let command: Vec<String> = probe
            .target
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        if command.is_empty() {
            return CheckOutcome::Error("empty probe command".to_owned());
        }

        match self.container.exec(service, &command, probe.timeout()).await {
            Ok(output) if output.success() => CheckOutcome::Ready,
            Ok(output) => CheckOutcome::NotReady(format!(
                "exit {}: {}",
                output.exit_code,
                output.last_stderr_line()
            )),
            Err(e) => CheckOutcome::Error(e.to_string()),
        }
    }
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe").finish_non_exhaustive()
    }
}
