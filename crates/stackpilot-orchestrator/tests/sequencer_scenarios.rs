//! End-to-end sequencer scenarios against mock providers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stackpilot_orchestrator::provider::{MockContainerProvider, MockDatabaseProvider};
use stackpilot_orchestrator::{
    Action, DeploymentSequencer, ProbeKind, RunOptions, RunStatus, StackConfig, StepOutcome,
    Strategy,
};

/// Default stack pointed at a temp directory, with probes rewritten so no
/// check leaves the mock: exec probes only, no waiting between attempts.
fn stack_config(root: &Path) -> StackConfig {
    let mut config = StackConfig::default();
    config.backup.dir = root.join("backups");
    config.backup.asset_dirs = Vec::new();
    config.reports.dir = root.join("reports");

    config.proxy.target_path = root.join("active.conf");
    for variant in &mut config.proxy.variants {
        let template = root.join(format!("{}.conf", variant.name));
        std::fs::write(&template, "server ${DOMAIN};\n").unwrap();
        variant.template_path = template;
        for artifact in &mut variant.required_artifacts {
            let name = artifact.file_name().unwrap().to_owned();
            *artifact = root.join("absent").join(name);
        }
    }

    for service in &mut config.services {
        if service.name.as_str() == "nginx" {
            service.probe = Some(stackpilot_orchestrator::Probe::exec(
                "curl -sf http://localhost/",
            ));
        }
        if let Some(probe) = &mut service.probe {
            probe.interval_secs = 0;
            probe.max_attempts = 2;
            probe.timeout_secs = 1;
        }
    }

    config
}

fn harness(
    config: StackConfig,
) -> (
    DeploymentSequencer,
    Arc<MockContainerProvider>,
    Arc<MockDatabaseProvider>,
) {
    let container = Arc::new(MockContainerProvider::default());
    let database = Arc::new(MockDatabaseProvider::default());
    let sequencer = DeploymentSequencer::new(config, container.clone(), database.clone())
        .unwrap()
        .with_retry_backoff(Duration::from_millis(1));
    (sequencer, container, database)
}

#[tokio::test]
async fn rolling_update_restarts_one_service_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, _) = harness(stack_config(dir.path()));

    let report = sequencer
        .run(Strategy::RollingUpdate, &RunOptions::default())
        .await;
    assert_eq!(report.status, RunStatus::Succeeded);

    let calls = container.calls();

    // Restarts proceed most-dependent first, each stop immediately
    // followed by the matching start.
    let lifecycle: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("stop ") || c.starts_with("start "))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            "stop celery-beat",
            "start celery-beat",
            "stop celery",
            "start celery",
            "stop api",
            "start api",
        ]
    );

    // Migrations run before the first service goes down.
    let migrate_at = calls
        .iter()
        .position(|c| c.contains("manage.py migrate"))
        .unwrap();
    let first_stop = calls.iter().position(|c| c.starts_with("stop ")).unwrap();
    assert!(migrate_at < first_stop);

    // Infrastructure is never stopped or removed.
    for name in ["db", "redis"] {
        assert!(!calls.iter().any(|c| c == &format!("stop {name}")));
        assert!(!calls.iter().any(|c| c == &format!("remove {name}")));
    }
}

#[tokio::test]
async fn health_wait_spaces_checks_by_probe_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = stack_config(dir.path());

    for service in &mut config.services {
        if service.name.as_str() == "api" {
            let probe = service.probe.as_mut().unwrap();
            assert_eq!(probe.kind, ProbeKind::Exec);
            probe.interval_secs = 1;
            probe.max_attempts = 12;
        }
    }

    let (sequencer, container, _) = harness(config);
    // Not ready on the first two checks, ready on the third.
    container.fail_exec("api", "curl", 2);

    let report = sequencer
        .run(Strategy::QuickUpdate, &RunOptions::default())
        .await;
    assert_eq!(report.status, RunStatus::Succeeded);

    // Two sleeps of one interval each sit between the three checks, and
    // none after the successful one.
    let wait = report
        .steps
        .iter()
        .find(|s| s.step.action == Action::HealthWait)
        .unwrap();
    assert!(wait.duration_ms >= 2_000, "waited {}ms", wait.duration_ms);
    assert!(wait.duration_ms < 3_000, "waited {}ms", wait.duration_ms);

    let checks = container
        .calls()
        .iter()
        .filter(|c| c.starts_with("exec api curl"))
        .count();
    assert_eq!(checks, 3);
}

#[tokio::test]
async fn reset_database_is_declined_without_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, _) = harness(stack_config(dir.path()));

    let report = sequencer
        .run(Strategy::ResetDatabase, &RunOptions::default())
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("--yes"));
    assert!(report
        .steps
        .iter()
        .all(|s| s.outcome == StepOutcome::Skipped));

    // Nothing was stopped, removed or snapshotted.
    assert!(container.calls().is_empty());
    assert!(!dir.path().join("backups").exists());
}

#[tokio::test]
async fn reset_database_aborts_before_teardown_when_dump_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, database) = harness(stack_config(dir.path()));
    database.set_fail_dump(true);

    let options = RunOptions {
        assume_yes: true,
        force: false,
    };
    let report = sequencer.run(Strategy::ResetDatabase, &options).await;

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.first_failure().unwrap();
    assert_eq!(failure.step.action, Action::Backup);

    // The stack was left untouched: every later step skipped, no
    // container call made.
    assert!(report.steps[1..]
        .iter()
        .all(|s| s.outcome == StepOutcome::Skipped));
    assert!(container.calls().is_empty());
}

#[tokio::test]
async fn confirmed_reset_removes_only_the_database_service() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, _) = harness(stack_config(dir.path()));

    let options = RunOptions {
        assume_yes: true,
        force: false,
    };
    let report = sequencer.run(Strategy::ResetDatabase, &options).await;
    assert_eq!(report.status, RunStatus::Succeeded);

    let calls = container.calls();
    let removes: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("remove "))
        .collect();
    assert_eq!(removes, vec!["remove db"]);

    // The snapshot lands on disk before the removal happens.
    let backups = std::fs::read_dir(dir.path().join("backups")).unwrap().count();
    assert_eq!(backups, 1);
}

#[tokio::test]
async fn deploy_orders_tiers_and_persists_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, _) = harness(stack_config(dir.path()));

    let report = sequencer
        .run(Strategy::Deploy, &RunOptions::default())
        .await;
    assert_eq!(report.status, RunStatus::Succeeded);

    let calls = container.calls();
    let position = |needle: &str| calls.iter().position(|c| c == needle).unwrap();

    assert!(position("stop (all)") < position("build (all)"));
    assert!(position("build (all)") < position("start db,redis"));
    assert!(position("start db,redis") < position("start api,celery,celery-beat"));
    assert!(position("start api,celery,celery-beat") < position("start nginx"));

    // Migrations run against a healthy database, before the app tier
    // comes up.
    let migrate_at = calls
        .iter()
        .position(|c| c.contains("manage.py migrate"))
        .unwrap();
    assert!(position("start db,redis") < migrate_at);
    assert!(migrate_at < position("start api,celery,celery-beat"));

    // The rendered proxy config and the run report are on disk.
    let active = std::fs::read_to_string(dir.path().join("active.conf")).unwrap();
    assert_eq!(active, "server example.com;\n");

    let reports = std::fs::read_dir(dir.path().join("reports")).unwrap().count();
    assert_eq!(reports, 1);
}

#[tokio::test]
async fn force_proceeds_without_a_recovery_point() {
    let dir = tempfile::tempdir().unwrap();
    let (sequencer, container, database) = harness(stack_config(dir.path()));
    database.set_fail_dump(true);

    // Without --force the dump failure aborts the run.
    let options = RunOptions {
        assume_yes: true,
        force: false,
    };
    let report = sequencer.run(Strategy::ResetDatabase, &options).await;
    assert_eq!(report.status, RunStatus::Failed);
    assert!(container.calls().is_empty());

    // With --force the failed snapshot degrades to a warning and the
    // reset runs to completion.
    let options = RunOptions {
        assume_yes: true,
        force: true,
    };
    let report = sequencer.run(Strategy::ResetDatabase, &options).await;
    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert!(container.calls().iter().any(|c| c == "remove db"));
}
