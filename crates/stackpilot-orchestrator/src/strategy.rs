//! Named deployment strategies.
//!
//! Each strategy is a declarative ordered composition of
//! [`DeploymentStep`] values derived from the [`ServiceGraph`]. Restart
//! ordering always respects the dependency relation: reverse topological
//! order for shutdown, forward for startup. The source scripts disagreed
//! with each other about celery vs celery-beat ordering; this module is
//! the single canonical answer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StackConfig;
use crate::graph::{ServiceGraph, ServiceTier};
use crate::step::{Action, DeploymentStep};
use crate::types::ServiceName;

/// A named operational goal, expanded to an ordered step list on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Full redeploy: everything stopped, rebuilt and started in
    /// dependency order.
    Deploy,
    /// Rolling update: app tier rebuilt and restarted one service at a
    /// time, most-dependent first, without touching infrastructure.
    RollingUpdate,
    /// Hot reload: app tier rebuilt and restarted, no migrations or
    /// static collection.
    QuickUpdate,
    /// Destructive reset: database removed and recreated from scratch.
    ResetDatabase,
    /// Take a snapshot and nothing else.
    Backup,
}

impl Strategy {
    /// Get the strategy name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::RollingUpdate => "rolling-update",
            Self::QuickUpdate => "quick-update",
            Self::ResetDatabase => "reset-database",
            Self::Backup => "backup",
        }
    }

    /// Expand the strategy into its ordered step list.
    #[must_use]
    pub fn steps(&self, config: &StackConfig, graph: &ServiceGraph) -> Vec<DeploymentStep> {
        match self {
            Self::Deploy => deploy_steps(config, graph),
            Self::RollingUpdate => rolling_update_steps(config, graph),
            Self::QuickUpdate => quick_update_steps(graph),
            Self::ResetDatabase => reset_database_steps(config, graph),
            Self::Backup => vec![DeploymentStep::all(Action::Backup)],
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(Self::Deploy),
            "rolling-update" => Ok(Self::RollingUpdate),
            "quick-update" => Ok(Self::QuickUpdate),
            "reset-database" => Ok(Self::ResetDatabase),
            "backup" => Ok(Self::Backup),
            _ => Err(format!("unknown strategy: {s}")),
        }
    }
}

fn app_service(config: &StackConfig) -> Vec<ServiceName> {
    vec![ServiceName::new(config.project.app_service.clone())]
}

fn reversed(mut names: Vec<ServiceName>) -> Vec<ServiceName> {
    names.reverse();
    names
}

/// Stop-then-start each service individually, most-dependent first, so a
/// service is never stopped while something that depends on it is still
/// required to be live.
fn rolling_restart(steps: &mut Vec<DeploymentStep>, services: Vec<ServiceName>) {
    for name in reversed(services) {
        steps.push(DeploymentStep::new(Action::Stop, vec![name.clone()]));
        steps.push(DeploymentStep::new(Action::Start, vec![name]));
    }
}

fn deploy_steps(config: &StackConfig, graph: &ServiceGraph) -> Vec<DeploymentStep> {
    let infra = graph.tier_names(ServiceTier::Infra);
    let app = graph.tier_names(ServiceTier::App);
    let proxy = graph.tier_names(ServiceTier::Proxy);

    let mut steps = vec![
        DeploymentStep::all(Action::Stop),
        DeploymentStep::all(Action::Build),
        DeploymentStep::new(Action::Start, infra),
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::Infra),
        ),
        DeploymentStep::new(Action::Migrate, app_service(config)).retry(2),
        DeploymentStep::new(Action::Start, app),
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::App),
        ),
        DeploymentStep::new(Action::CollectStatic, app_service(config)).warn_and_continue(),
        DeploymentStep::all(Action::ConfigSwitch),
        DeploymentStep::new(Action::Start, proxy),
    ];
    steps.push(
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::Proxy),
        )
        .warn_and_continue(),
    );
    steps
}

fn rolling_update_steps(config: &StackConfig, graph: &ServiceGraph) -> Vec<DeploymentStep> {
    let app = graph.tier_names(ServiceTier::App);

    let mut steps = vec![
        DeploymentStep::new(Action::Build, app.clone()),
        DeploymentStep::new(Action::Migrate, app_service(config)).retry(2),
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::Infra),
        ),
    ];
    rolling_restart(&mut steps, app);
    steps.push(DeploymentStep::new(
        Action::HealthWait,
        graph.probed_tier_names(ServiceTier::App),
    ));
    steps.push(
        DeploymentStep::new(Action::CollectStatic, app_service(config)).warn_and_continue(),
    );
    steps
}

fn quick_update_steps(graph: &ServiceGraph) -> Vec<DeploymentStep> {
    let app = graph.tier_names(ServiceTier::App);

    let mut steps = vec![DeploymentStep::new(Action::Build, app.clone())];
    rolling_restart(&mut steps, app);
    steps.push(DeploymentStep::new(
        Action::HealthWait,
        graph.probed_tier_names(ServiceTier::App),
    ));
    steps
}

/// The snapshot comes first, before anything is stopped: if the dump
/// fails the pre-existing stack is left untouched.
fn reset_database_steps(config: &StackConfig, graph: &ServiceGraph) -> Vec<DeploymentStep> {
    let db = vec![ServiceName::new(config.database.service.clone())];
    let infra = graph.tier_names(ServiceTier::Infra);
    let app = graph.tier_names(ServiceTier::App);
    let proxy = graph.tier_names(ServiceTier::Proxy);

    let mut steps = vec![
        DeploymentStep::all(Action::Backup),
        DeploymentStep::new(Action::Stop, reversed(app.clone())),
        DeploymentStep::new(Action::Stop, reversed(proxy.clone())),
        DeploymentStep::new(Action::Remove, db).destructive(),
        DeploymentStep::new(Action::Start, infra),
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::Infra),
        ),
        DeploymentStep::new(Action::Migrate, app_service(config)).retry(2),
        DeploymentStep::new(Action::Start, app),
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::App),
        ),
        DeploymentStep::new(Action::Start, proxy),
    ];
    steps.push(
        DeploymentStep::new(
            Action::HealthWait,
            graph.probed_tier_names(ServiceTier::Proxy),
        )
        .warn_and_continue(),
    );
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::OnFailure;

    fn fixture() -> (StackConfig, ServiceGraph) {
        let config = StackConfig::default();
        let graph = ServiceGraph::new(config.services.clone()).unwrap();
        (config, graph)
    }

    #[test]
    fn strategy_name_roundtrip() {
        for strategy in [
            Strategy::Deploy,
            Strategy::RollingUpdate,
            Strategy::QuickUpdate,
            Strategy::ResetDatabase,
            Strategy::Backup,
        ] {
            let parsed: Strategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
        assert!("full-send".parse::<Strategy>().is_err());
    }

    #[test]
    fn rolling_update_restarts_most_dependent_first() {
        let (config, graph) = fixture();
        let steps = Strategy::RollingUpdate.steps(&config, &graph);

        let restart_targets: Vec<&str> = steps
            .iter()
            .filter(|s| s.action == Action::Stop)
            .flat_map(|s| s.targets.iter().map(ServiceName::as_str))
            .collect();

        // App tier forward order is api, celery, celery-beat; shutdown is
        // the reverse.
        assert_eq!(restart_targets, vec!["celery-beat", "celery", "api"]);

        // Each stop is immediately followed by the matching start.
        for window in steps.windows(2) {
            if window[0].action == Action::Stop {
                assert_eq!(window[1].action, Action::Start);
                assert_eq!(window[1].targets, window[0].targets);
            }
        }
    }

    #[test]
    fn rolling_update_never_touches_infra() {
        let (config, graph) = fixture();
        let steps = Strategy::RollingUpdate.steps(&config, &graph);

        for step in &steps {
            if matches!(step.action, Action::Stop | Action::Start | Action::Remove) {
                for target in &step.targets {
                    assert_ne!(target.as_str(), "db");
                    assert_ne!(target.as_str(), "redis");
                }
            }
        }
    }

    #[test]
    fn reset_database_snapshots_before_any_stop() {
        let (config, graph) = fixture();
        let steps = Strategy::ResetDatabase.steps(&config, &graph);

        assert_eq!(steps[0].action, Action::Backup);

        let remove = steps
            .iter()
            .find(|s| s.action == Action::Remove)
            .expect("reset must remove the database service");
        assert!(remove.destructive);
        assert_eq!(remove.targets, vec![ServiceName::new("db")]);
    }

    #[test]
    fn deploy_switches_config_before_starting_proxy() {
        let (config, graph) = fixture();
        let steps = Strategy::Deploy.steps(&config, &graph);

        let switch_at = steps
            .iter()
            .position(|s| s.action == Action::ConfigSwitch)
            .unwrap();
        let proxy_start_at = steps
            .iter()
            .position(|s| {
                s.action == Action::Start && s.targets.contains(&ServiceName::new("nginx"))
            })
            .unwrap();
        assert!(switch_at < proxy_start_at);
    }

    #[test]
    fn best_effort_steps_warn_instead_of_aborting() {
        let (config, graph) = fixture();
        let steps = Strategy::Deploy.steps(&config, &graph);

        let collect = steps
            .iter()
            .find(|s| s.action == Action::CollectStatic)
            .unwrap();
        assert_eq!(collect.on_failure, OnFailure::WarnAndContinue);
    }
}
