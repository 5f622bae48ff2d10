//! Strategy execution with interrupt handling.

use stackpilot_orchestrator::{OrchestratorResult, RunOptions, StackConfig, Strategy};
use tracing::warn;

/// Execute a strategy and print its report.
///
/// Returns the process exit code: 0 for succeeded or partially-succeeded
/// runs, 1 for failed ones. A first Ctrl-C cancels the run between steps;
/// the current step always runs to completion.
pub async fn run(
    config: StackConfig,
    strategy: Strategy,
    options: RunOptions,
) -> OrchestratorResult<u8> {
    let sequencer = super::sequencer(config)?;

    let cancel = sequencer.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current step, then stopping");
            cancel.cancel();
        }
    });

    let report = sequencer.run(strategy, &options).await;
    print!("{report}");

    Ok(u8::from(!report.succeeded()))
}
