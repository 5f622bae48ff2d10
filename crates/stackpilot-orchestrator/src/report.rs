//! Run reports.
//!
//! A [`RunReport`] is the persisted record of one sequencer run: every
//! step with its outcome, attempts and duration, plus the overall status.
//! Reports are plain JSON documents so operators can inspect them without
//! tooling.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::step::DeploymentStep;
use crate::types::RunId;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded.
    Succeeded,
    /// A step failed under abort policy, or the run was declined or
    /// cancelled.
    Failed,
    /// The run completed, but at least one warn-and-continue step failed.
    PartiallySucceeded,
}

impl RunStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::PartiallySucceeded => "partially_succeeded",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one executed (or skipped) step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step completed.
    Succeeded,
    /// The step failed but its policy was warn-and-continue.
    Warned {
        /// The recorded failure.
        error: String,
    },
    /// The step failed fatally.
    Failed {
        /// The recorded failure, wrapped with step context.
        error: String,
    },
    /// The step never ran because an earlier step aborted the run.
    Skipped,
}

impl StepOutcome {
    /// True if the step failed fatally.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One step's entry in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Zero-based position within the strategy.
    pub index: usize,
    /// The step as composed by the strategy.
    pub step: DeploymentStep,
    /// What happened.
    pub outcome: StepOutcome,
    /// Number of attempts made (0 for skipped steps).
    pub attempts: u32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Record of one sequencer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: RunId,
    /// Strategy that was executed.
    pub strategy: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Overall status.
    pub status: RunStatus,
    /// Run-level failure, if the run did not succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-step records, in execution order.
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    /// True unless a step failed under abort policy.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        !matches!(self.status, RunStatus::Failed)
    }

    /// The first fatally failed step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.outcome.is_fatal())
    }

    /// Write the report as pretty-printed JSON under `dir`.
    ///
    /// Returns the path of the written file.
    pub async fn persist(&self, dir: &Path) -> OrchestratorResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!("run-{}.json", self.run_id));
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| OrchestratorError::serialisation(e.to_string()))?;
        tokio::fs::write(&path, json).await?;

        Ok(path)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} ({}): {}",
            self.run_id, self.strategy, self.status
        )?;

        for record in &self.steps {
            let marker = match &record.outcome {
                StepOutcome::Succeeded => "ok",
                StepOutcome::Warned { .. } => "warned",
                StepOutcome::Failed { .. } => "FAILED",
                StepOutcome::Skipped => "skipped",
            };
            writeln!(
                f,
                "  {:>2}. {:<40} {:>7}  {:>6}ms  x{}",
                record.index + 1,
                record.step.describe(),
                marker,
                record.duration_ms,
                record.attempts
            )?;
            match &record.outcome {
                StepOutcome::Warned { error } => writeln!(f, "      warning: {error}")?,
                StepOutcome::Failed { error } => writeln!(f, "      error: {error}")?,
                StepOutcome::Succeeded | StepOutcome::Skipped => {}
            }
        }

        if let Some(failure) = self.first_failure() {
            writeln!(
                f,
                "first fatal step: {} ({})",
                failure.index + 1,
                failure.step.describe()
            )?;
        } else if let Some(error) = &self.error {
            writeln!(f, "run error: {error}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Action, DeploymentStep};
    use crate::types::ServiceName;

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: RunId::generate(),
            strategy: "rolling-update".to_owned(),
            started_at: now,
            finished_at: now,
            status: RunStatus::Failed,
            error: Some("step 2 failed".to_owned()),
            steps: vec![
                StepRecord {
                    index: 0,
                    step: DeploymentStep::new(Action::Build, vec![ServiceName::new("api")]),
                    outcome: StepOutcome::Succeeded,
                    attempts: 1,
                    duration_ms: 1200,
                },
                StepRecord {
                    index: 1,
                    step: DeploymentStep::new(Action::Migrate, vec![ServiceName::new("api")]),
                    outcome: StepOutcome::Failed {
                        error: "migrate blew up".to_owned(),
                    },
                    attempts: 3,
                    duration_ms: 40,
                },
                StepRecord {
                    index: 2,
                    step: DeploymentStep::all(Action::ConfigSwitch),
                    outcome: StepOutcome::Skipped,
                    attempts: 0,
                    duration_ms: 0,
                },
            ],
        }
    }

    #[test]
    fn first_failure_finds_fatal_step() {
        let report = report();
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.index, 1);
        assert!(!report.succeeded());
    }

    #[test]
    fn render_highlights_first_fatal_step() {
        let rendered = report().to_string();
        assert!(rendered.contains("FAILED"));
        assert!(rendered.contains("first fatal step: 2"));
        assert!(rendered.contains("migrate blew up"));
    }

    #[tokio::test]
    async fn persist_writes_inspectable_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = report();

        let path = report.persist(dir.path()).await.unwrap();
        assert!(path.exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: RunReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.status, RunStatus::Failed);
        assert_eq!(parsed.steps.len(), 3);
    }
}
