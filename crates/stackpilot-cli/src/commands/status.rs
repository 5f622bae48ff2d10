//! Per-service container status.

use stackpilot_orchestrator::{OrchestratorResult, StackConfig};

pub async fn run(config: StackConfig) -> OrchestratorResult<u8> {
    let sequencer = super::sequencer(config)?;

    let statuses = sequencer.status().await?;
    if statuses.is_empty() {
        println!("no containers found");
        return Ok(0);
    }

    for status in statuses {
        match &status.health {
            Some(health) => println!("{:<16} {:<10} ({health})", status.name, status.state),
            None => println!("{:<16} {:<10}", status.name, status.state),
        }
    }

    Ok(0)
}
