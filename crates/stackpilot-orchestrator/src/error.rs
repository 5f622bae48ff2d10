//! Error types for the orchestrator.
//!
//! The taxonomy distinguishes errors that are fatal before any mutation
//! (configuration and graph validation) from failures surfaced by external
//! collaborators, which are subject to per-step failure policy. Probe
//! timeouts get their own variant so callers can decide whether an
//! exhausted health wait is fatal without string-matching command errors.

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors that can occur while sequencing a deployment.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Configuration error, detected before any mutation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The service dependency relation contains a cycle.
    #[error("cyclic service dependency involving: {services:?}")]
    CyclicDependency {
        /// Services left unordered by the topological sort.
        services: Vec<String>,
    },

    /// A dependency or step target references an undeclared service.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// An external command exited non-zero or could not be run.
    #[error("external command failed: {command}: {detail}")]
    External {
        /// The command that failed.
        command: String,
        /// Exit code, if the process ran at all.
        exit_code: Option<i32>,
        /// Last stderr line or spawn failure description.
        detail: String,
    },

    /// A health probe exhausted its attempts.
    #[error("service {service} not ready after {attempts} attempts: {last_failure}")]
    Timeout {
        /// Service that never became ready.
        service: String,
        /// Number of checks performed.
        attempts: u32,
        /// Failure reason from the last check.
        last_failure: String,
    },

    /// A destructive step was reached without operator confirmation.
    #[error("destructive step '{step}' declined: re-run with --yes to confirm")]
    DestructiveActionDeclined {
        /// Description of the declined step.
        step: String,
    },

    /// Snapshot creation failed.
    #[error("snapshot failed: {0}")]
    Snapshot(String),

    /// The run was cancelled by the operator between steps.
    #[error("run cancelled by operator")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// A failure wrapped with sequencer step context.
    #[error("step {index} ({action}) failed for {targets} on attempt {attempt}: {source}")]
    Step {
        /// Zero-based step index within the strategy.
        index: usize,
        /// Step action name.
        action: String,
        /// Targets the step was operating on.
        targets: String,
        /// Attempt number on which the step finally failed.
        attempt: u32,
        /// Underlying failure.
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an external command error.
    #[must_use]
    pub fn external(
        command: impl Into<String>,
        exit_code: Option<i32>,
        detail: impl Into<String>,
    ) -> Self {
        Self::External {
            command: command.into(),
            exit_code,
            detail: detail.into(),
        }
    }

    /// Create a snapshot error.
    #[must_use]
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    /// Create a serialisation error.
    #[must_use]
    pub fn serialisation(msg: impl Into<String>) -> Self {
        Self::Serialisation(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors detected before any external mutation occurred.
    ///
    /// These map to exit code 2 on the CLI surface.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::CyclicDependency { .. } | Self::UnknownService(_)
        )
    }
}
