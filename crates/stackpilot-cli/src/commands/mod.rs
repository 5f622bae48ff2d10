//! CLI command implementations.

pub mod init_ssl;
pub mod prune;
pub mod run;
pub mod status;

use std::sync::Arc;

use stackpilot_orchestrator::{
    ComposeProvider, ContainerProvider, DeploymentSequencer, OrchestratorResult, PgProvider,
    StackConfig,
};

/// Wire the production providers into a sequencer.
fn sequencer(config: StackConfig) -> OrchestratorResult<DeploymentSequencer> {
    let container: Arc<dyn ContainerProvider> = Arc::new(ComposeProvider::new(&config.project)?);
    let database = Arc::new(PgProvider::new(container.clone(), config.database.clone()));
    DeploymentSequencer::new(config, container, database)
}
