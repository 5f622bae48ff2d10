//! The deployment step vocabulary.
//!
//! Strategies are declarative ordered lists of [`DeploymentStep`] values
//! built from this shared vocabulary; strategies differ only in
//! composition, never in reimplemented logic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ServiceName;

/// One kind of sequencer work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Build images for the target services.
    Build,
    /// Stop the target services.
    Stop,
    /// Start the target services.
    Start,
    /// Stop and remove the target services, including their volumes.
    Remove,
    /// Run database migrations inside the app service.
    Migrate,
    /// Collect static files inside the app service.
    CollectStatic,
    /// Wait for the target services' probes to report ready.
    HealthWait,
    /// Take a snapshot.
    Backup,
    /// Select and apply the active proxy configuration variant.
    ConfigSwitch,
}

impl Action {
    /// Get the action name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Stop => "stop",
            Self::Start => "start",
            Self::Remove => "remove",
            Self::Migrate => "migrate",
            Self::CollectStatic => "collect_static",
            Self::HealthWait => "health_wait",
            Self::Backup => "backup",
            Self::ConfigSwitch => "config_switch",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Stop the run and report it failed.
    Abort,
    /// Record the failure and proceed to the next step.
    WarnAndContinue,
    /// Re-attempt the step up to `n` extra times with linear backoff, then
    /// abort.
    Retry(u32),
}

/// One unit of sequencer work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStep {
    /// What to do.
    pub action: Action,

    /// Services the action targets, in order. Empty means all services.
    pub targets: Vec<ServiceName>,

    /// Failure policy for this step.
    pub on_failure: OnFailure,

    /// Whether this step can cause irreversible data loss. Destructive
    /// steps require operator confirmation and a prior snapshot.
    pub destructive: bool,
}

impl DeploymentStep {
    /// Create a step with abort-on-failure semantics.
    #[must_use]
    pub fn new(action: Action, targets: Vec<ServiceName>) -> Self {
        Self {
            action,
            targets,
            on_failure: OnFailure::Abort,
            destructive: false,
        }
    }

    /// Create a step targeting all services.
    #[must_use]
    pub fn all(action: Action) -> Self {
        Self::new(action, Vec::new())
    }

    /// Record the failure and continue instead of aborting.
    #[must_use]
    pub fn warn_and_continue(mut self) -> Self {
        self.on_failure = OnFailure::WarnAndContinue;
        self
    }

    /// Retry up to `n` extra times before aborting.
    #[must_use]
    pub fn retry(mut self, n: u32) -> Self {
        self.on_failure = OnFailure::Retry(n);
        self
    }

    /// Mark the step destructive.
    #[must_use]
    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// Short human-readable description, e.g. `stop [celery-beat]`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.targets.is_empty() {
            format!("{} (all)", self.action)
        } else {
            let names: Vec<&str> = self.targets.iter().map(ServiceName::as_str).collect();
            format!("{} [{}]", self.action, names.join(", "))
        }
    }
}

impl fmt::Display for DeploymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}
