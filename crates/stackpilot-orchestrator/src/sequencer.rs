//! The deployment sequencer.
//!
//! Executes a strategy's ordered step list against the service graph,
//! enforcing per-step failure policy, gating destructive steps behind
//! operator confirmation and a prior snapshot, and producing a
//! [`RunReport`].
//!
//! Steps execute strictly sequentially on one task: later steps
//! (migrations, static collection) assume the database and image state
//! left by earlier steps. Cancellation is honored between steps, never
//! mid-step, so a step that touches external state always runs to
//! completion or explicit failure first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::backup::BackupCoordinator;
use crate::config::StackConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::graph::ServiceGraph;
use crate::probe::{HealthProbe, WaitOutcome};
use crate::provider::{ContainerProvider, DatabaseProvider};
use crate::report::{RunReport, RunStatus, StepOutcome, StepRecord};
use crate::step::{Action, DeploymentStep, OnFailure};
use crate::strategy::Strategy;
use crate::switcher::ConfigSwitcher;
use crate::types::{RunId, ServiceName};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Caller-supplied options for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Operator confirmation for destructive steps. Without it a strategy
    /// containing a destructive step is declined before any mutation.
    pub assume_yes: bool,

    /// Proceed with a destructive step even if the pre-step snapshot
    /// failed. Confirmation and running unbacked are separate risks, so
    /// this is a separate flag.
    pub force: bool,
}

/// Cooperative cancellation flag, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The current step still runs to completion.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes deployment strategies against the service graph.
pub struct DeploymentSequencer {
    config: StackConfig,
    graph: ServiceGraph,
    container: Arc<dyn ContainerProvider>,
    probe: HealthProbe,
    switcher: ConfigSwitcher,
    backup: BackupCoordinator,
    cancel: CancelFlag,
    retry_backoff: Duration,
}

impl DeploymentSequencer {
    /// Create a sequencer.
    ///
    /// Validates the service graph and proxy variants; any failure here
    /// is a configuration error raised before any external call.
    pub fn new(
        config: StackConfig,
        container: Arc<dyn ContainerProvider>,
        database: Arc<dyn DatabaseProvider>,
    ) -> OrchestratorResult<Self> {
        let graph = ServiceGraph::new(config.services.clone())?;
        let switcher = ConfigSwitcher::new(&config.proxy, config.substitutions())?;
        let backup = BackupCoordinator::new(config.backup.clone(), database);
        let probe = HealthProbe::new(container.clone());

        Ok(Self {
            config,
            graph,
            container,
            probe,
            switcher,
            backup,
            cancel: CancelFlag::new(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// The flag external signal handlers should set to cancel the run
    /// between steps.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Override the base retry backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The validated service graph.
    #[must_use]
    pub const fn graph(&self) -> &ServiceGraph {
        &self.graph
    }

    /// The backup coordinator, for manual prune/list operations.
    #[must_use]
    pub const fn backup(&self) -> &BackupCoordinator {
        &self.backup
    }

    /// Execute a strategy and produce a run report.
    ///
    /// The report is also persisted under the configured reports
    /// directory; persistence failure is logged, not fatal.
    pub async fn run(&self, strategy: Strategy, options: &RunOptions) -> RunReport {
        let run_id = RunId::generate();
        let started_at = Utc::now();
        let steps = strategy.steps(&self.config, &self.graph);

        info!(
            run = %run_id,
            strategy = %strategy,
            steps = steps.len(),
            "starting run"
        );

        let mut records = Vec::with_capacity(steps.len());
        let mut run_error: Option<String> = None;
        let mut warned = false;
        let mut snapshot_taken = false;

        // Destructive strategies are declined up front, before any step
        // touches the stack.
        if !options.assume_yes {
            if let Some(step) = steps.iter().find(|s| s.destructive) {
                let declined = OrchestratorError::DestructiveActionDeclined {
                    step: step.describe(),
                };
                error!(run = %run_id, "{declined}");
                run_error = Some(declined.to_string());
            }
        }

        for (index, step) in steps.iter().enumerate() {
            if run_error.is_some() {
                records.push(skipped(index, step));
                continue;
            }

            if self.cancel.is_cancelled() {
                warn!(run = %run_id, step = %step.describe(), "cancelled before step");
                run_error = Some(OrchestratorError::Cancelled.to_string());
                records.push(skipped(index, step));
                continue;
            }

            let step_started = Instant::now();

            if step.destructive && !snapshot_taken {
                match self.backup.snapshot("pre-destructive").await {
                    Ok(snapshot) => {
                        info!(snapshot = %snapshot.id, "pre-destructive snapshot taken");
                        snapshot_taken = true;
                    }
                    Err(e) if options.force => {
                        warn!(error = %e, "snapshot failed, proceeding anyway (--force)");
                    }
                    Err(e) => {
                        let wrapped = wrap(index, step, 1, e);
                        error!(run = %run_id, "{wrapped}");
                        run_error = Some(wrapped.to_string());
                        records.push(StepRecord {
                            index,
                            step: step.clone(),
                            outcome: StepOutcome::Failed {
                                error: wrapped.to_string(),
                            },
                            attempts: 0,
                            duration_ms: elapsed_ms(step_started),
                        });
                        continue;
                    }
                }
            }

            let max_attempts = match step.on_failure {
                OnFailure::Retry(extra) => extra + 1,
                OnFailure::Abort | OnFailure::WarnAndContinue => 1,
            };

            let mut attempts = 0;
            let mut failure: Option<OrchestratorError> = None;

            while attempts < max_attempts {
                attempts += 1;
                match self.execute_action(step).await {
                    Ok(()) => {
                        failure = None;
                        break;
                    }
                    Err(e) => {
                        if attempts < max_attempts {
                            let backoff = self.retry_backoff * attempts;
                            warn!(
                                step = %step.describe(),
                                attempt = attempts,
                                error = %e,
                                "step failed, retrying after {:?}",
                                backoff
                            );
                            tokio::time::sleep(backoff).await;
                        }
                        failure = Some(e);
                    }
                }
            }

            if step.action == Action::Backup && failure.is_none() {
                snapshot_taken = true;
            }

            let duration_ms = elapsed_ms(step_started);
            match failure {
                None => {
                    debug!(step = %step.describe(), duration_ms, "step succeeded");
                    records.push(StepRecord {
                        index,
                        step: step.clone(),
                        outcome: StepOutcome::Succeeded,
                        attempts,
                        duration_ms,
                    });
                }
                Some(e) => {
                    let wrapped = wrap(index, step, attempts, e);
                    // --force waives the recovery-point requirement, so a
                    // failed snapshot step degrades to a warning.
                    let policy = if step.action == Action::Backup && options.force {
                        OnFailure::WarnAndContinue
                    } else {
                        step.on_failure
                    };
                    match policy {
                        OnFailure::WarnAndContinue => {
                            warn!(run = %run_id, "{wrapped}");
                            warned = true;
                            records.push(StepRecord {
                                index,
                                step: step.clone(),
                                outcome: StepOutcome::Warned {
                                    error: wrapped.to_string(),
                                },
                                attempts,
                                duration_ms,
                            });
                        }
                        OnFailure::Abort | OnFailure::Retry(_) => {
                            error!(run = %run_id, "{wrapped}");
                            run_error = Some(wrapped.to_string());
                            records.push(StepRecord {
                                index,
                                step: step.clone(),
                                outcome: StepOutcome::Failed {
                                    error: wrapped.to_string(),
                                },
                                attempts,
                                duration_ms,
                            });
                        }
                    }
                }
            }
        }

        let status = if run_error.is_some() {
            RunStatus::Failed
        } else if warned {
            RunStatus::PartiallySucceeded
        } else {
            RunStatus::Succeeded
        };

        let report = RunReport {
            run_id,
            strategy: strategy.as_str().to_owned(),
            started_at,
            finished_at: Utc::now(),
            status,
            error: run_error,
            steps: records,
        };

        match status {
            RunStatus::Failed => error!(run = %report.run_id, "run failed"),
            RunStatus::PartiallySucceeded => {
                warn!(run = %report.run_id, "run completed with warnings");
            }
            RunStatus::Succeeded => info!(run = %report.run_id, "run succeeded"),
        }

        if let Err(e) = report.persist(&self.config.reports.dir).await {
            warn!(error = %e, "failed to persist run report");
        }

        report
    }

    /// Per-service running/health status, straight from the container
    /// provider.
    pub async fn status(&self) -> OrchestratorResult<Vec<crate::provider::ServiceStatus>> {
        self.container.ps().await
    }

    /// Issue a TLS certificate and promote the proxy to the TLS variant.
    ///
    /// The proxy must be serving the HTTP variant first so the HTTP-01
    /// challenge webroot is reachable; after issuance the variant switch
    /// picks up the new artifacts and the proxy tier is restarted.
    pub async fn init_ssl(
        &self,
        certificates: &dyn crate::provider::CertificateProvider,
    ) -> OrchestratorResult<()> {
        let domain = &self.config.certificates.domain;
        let proxy = self.graph.tier_names(crate::graph::ServiceTier::Proxy);

        if certificates.has_valid_certificate(domain).await? {
            info!(domain = %domain, "certificate already present");
        } else {
            // Serve the challenge over plain HTTP.
            let (variant, _) = self.switcher.switch().await?;
            info!(variant = %variant, "serving challenge variant");
            self.container.start(&proxy).await?;

            certificates
                .issue(domain, &self.config.certificates.email)
                .await?;
            info!(domain = %domain, "certificate issued");
        }

        let (variant, applied) = self.switcher.switch().await?;
        info!(variant = %variant, applied = ?applied, "post-issuance config switch");

        self.container.stop(&proxy).await?;
        self.container.start(&proxy).await?;
        Ok(())
    }

    async fn execute_action(&self, step: &DeploymentStep) -> OrchestratorResult<()> {
        match step.action {
            Action::Build => self.container.build(&step.targets).await,
            Action::Stop => self.container.stop(&step.targets).await,
            Action::Start => self.container.start(&step.targets).await,
            Action::Remove => self.container.remove(&step.targets).await,
            Action::Migrate => {
                self.manage_command(step, &["python", "manage.py", "migrate", "--noinput"])
                    .await
            }
            Action::CollectStatic => {
                self.manage_command(step, &["python", "manage.py", "collectstatic", "--noinput"])
                    .await
            }
            Action::HealthWait => self.health_wait(step).await,
            Action::Backup => self.backup.snapshot("manual").await.map(|_| ()),
            Action::ConfigSwitch => {
                let (variant, applied) = self.switcher.switch().await?;
                info!(variant = %variant, applied = ?applied, "config switch");
                Ok(())
            }
        }
    }

    /// Run a Django management command inside the app service.
    async fn manage_command(
        &self,
        step: &DeploymentStep,
        command: &[&str],
    ) -> OrchestratorResult<()> {
        let service = step
            .targets
            .first()
            .cloned()
            .unwrap_or_else(|| ServiceName::new(self.config.project.app_service.clone()));

        let command: Vec<String> = command.iter().map(|s| (*s).to_owned()).collect();
        let timeout = Duration::from_secs(self.config.project.command_timeout_secs);

        let output = self.container.exec(&service, &command, timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(OrchestratorError::external(
                command.join(" "),
                Some(output.exit_code),
                output.last_stderr_line().to_owned(),
            ))
        }
    }

    async fn health_wait(&self, step: &DeploymentStep) -> OrchestratorResult<()> {
        let targets: Vec<ServiceName> = if step.targets.is_empty() {
            self.graph
                .topological_order()
                .into_iter()
                .filter(|s| s.probe.is_some())
                .map(|s| s.name.clone())
                .collect()
        } else {
            step.targets.clone()
        };

        for name in targets {
            let Some(spec) = self.graph.get(&name) else {
                return Err(OrchestratorError::UnknownService(name.to_string()));
            };
            let Some(probe) = &spec.probe else {
                debug!(service = %name, "no probe defined, skipping health wait");
                continue;
            };

            match self.probe.wait_until_ready(&name, probe).await {
                WaitOutcome::Ready { attempts } => {
                    info!(service = %name, attempts, "service ready");
                }
                WaitOutcome::TimedOut {
                    attempts,
                    last_failure,
                } => {
                    return Err(OrchestratorError::Timeout {
                        service: name.to_string(),
                        attempts,
                        last_failure,
                    });
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for DeploymentSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentSequencer")
            .field("project", &self.config.project.name)
            .finish_non_exhaustive()
    }
}

fn skipped(index: usize, step: &DeploymentStep) -> StepRecord {
    StepRecord {
        index,
        step: step.clone(),
        outcome: StepOutcome::Skipped,
        attempts: 0,
        duration_ms: 0,
    }
}

fn wrap(
    index: usize,
    step: &DeploymentStep,
    attempt: u32,
    source: OrchestratorError,
) -> OrchestratorError {
    let targets = if step.targets.is_empty() {
        "(all)".to_owned()
    } else {
        step.targets
            .iter()
            .map(ServiceName::as_str)
            .collect::<Vec<_>>()
            .join(",")
    };

    OrchestratorError::Step {
        index,
        action: step.action.as_str().to_owned(),
        targets,
        attempt,
        source: Box::new(source),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockContainerProvider, MockDatabaseProvider};

    fn test_config(root: &std::path::Path) -> StackConfig {
        let mut config = StackConfig::default();
        config.backup.dir = root.join("backups");
        config.backup.asset_dirs = Vec::new();
        config.reports.dir = root.join("reports");

        // The stock nginx probe dials a real port; exec probes stay inside
        // the mock. Keep the attempt budget tiny so timeouts are fast.
        for service in &mut config.services {
            if let Some(probe) = &mut service.probe {
                probe.interval_secs = 0;
                probe.max_attempts = 2;
            }
            if service.name.as_str() == "nginx" {
                service.probe = Some(crate::probe::Probe {
                    kind: crate::probe::ProbeKind::Exec,
                    target: "curl -sf http://localhost/".to_owned(),
                    timeout_secs: 1,
                    interval_secs: 0,
                    max_attempts: 2,
                });
            }
        }

        config.proxy.target_path = root.join("active.conf");
        for variant in &mut config.proxy.variants {
            let template = root.join(format!("{}.conf", variant.name));
            std::fs::write(&template, "server ${DOMAIN};\n").unwrap();
            variant.template_path = template;
            // Point TLS artifacts somewhere that does not exist.
            for artifact in &mut variant.required_artifacts {
                let name = artifact.file_name().unwrap().to_owned();
                *artifact = root.join("missing").join(name);
            }
        }

        config
    }

    fn sequencer(root: &std::path::Path) -> (DeploymentSequencer, Arc<MockContainerProvider>) {
        let container = Arc::new(MockContainerProvider::default());
        let database = Arc::new(MockDatabaseProvider::default());
        let sequencer = DeploymentSequencer::new(
            test_config(root),
            container.clone(),
            database,
        )
        .unwrap()
        .with_retry_backoff(Duration::from_millis(1));
        (sequencer, container)
    }

    #[tokio::test]
    async fn cancelled_run_skips_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, container) = sequencer(dir.path());

        sequencer.cancel_flag().cancel();
        let report = sequencer
            .run(Strategy::QuickUpdate, &RunOptions::default())
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().unwrap_or("").contains("cancelled"));
        assert!(report
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::Skipped));
        assert!(container.calls().is_empty());
    }

    #[tokio::test]
    async fn retry_policy_reattempts_before_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, container) = sequencer(dir.path());

        // migrate runs python inside api; fail it more times than the
        // retry budget allows.
        container.fail_exec("api", "python", 10);

        let report = sequencer
            .run(Strategy::RollingUpdate, &RunOptions::default())
            .await;

        assert_eq!(report.status, RunStatus::Failed);
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.step.action, Action::Migrate);
        // retry(2) means three attempts in total.
        assert_eq!(failure.attempts, 3);
    }

    #[tokio::test]
    async fn unready_proxy_only_degrades_deploy_to_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, container) = sequencer(dir.path());

        // The proxy health wait is best-effort; everything else is fine.
        container.fail_exec("nginx", "curl", u32::MAX);

        let report = sequencer
            .run(Strategy::Deploy, &RunOptions::default())
            .await;

        assert_eq!(report.status, RunStatus::PartiallySucceeded);
        assert!(report.succeeded());
        assert!(report.first_failure().is_none());

        let warned: Vec<_> = report
            .steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Warned { .. }))
            .collect();
        assert_eq!(warned.len(), 1);
        assert_eq!(warned[0].step.action, Action::HealthWait);
    }

    #[tokio::test]
    async fn init_ssl_issues_then_restarts_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, container) = sequencer(dir.path());
        let certificates = crate::provider::MockCertificateProvider::default();

        sequencer.init_ssl(&certificates).await.unwrap();

        assert_eq!(certificates.issued(), vec!["example.com".to_owned()]);
        let calls = container.calls();
        let stop_at = calls.iter().position(|c| c == "stop nginx").unwrap();
        let restart_at = calls.iter().rposition(|c| c == "start nginx").unwrap();
        assert!(stop_at < restart_at);
    }

    #[tokio::test]
    async fn init_ssl_skips_issuance_when_certificate_present() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, _) = sequencer(dir.path());
        let certificates = crate::provider::MockCertificateProvider::default();
        certificates.set_valid(true);

        sequencer.init_ssl(&certificates).await.unwrap();
        assert!(certificates.issued().is_empty());
    }

    #[tokio::test]
    async fn rolling_update_succeeds_against_healthy_mock() {
        let dir = tempfile::tempdir().unwrap();
        let (sequencer, _) = sequencer(dir.path());

        let report = sequencer
            .run(Strategy::RollingUpdate, &RunOptions::default())
            .await;
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(report.steps.iter().all(|s| s.attempts == 1));
    }
}
