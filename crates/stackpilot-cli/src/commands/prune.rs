//! Snapshot retention sweep.

use stackpilot_orchestrator::{OrchestratorResult, StackConfig};

pub async fn run(config: StackConfig) -> OrchestratorResult<u8> {
    let sequencer = super::sequencer(config)?;

    let removed = sequencer.backup().prune().await?;
    let kept = sequencer.backup().list().await?.len();
    println!("removed {removed} expired snapshot(s), {kept} kept");

    Ok(0)
}
