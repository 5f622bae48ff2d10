//! Certificate issuance and TLS promotion.

use stackpilot_orchestrator::{CertbotProvider, OrchestratorResult, StackConfig};

pub async fn run(config: StackConfig) -> OrchestratorResult<u8> {
    let certificates = CertbotProvider::new(&config.certificates)?;
    let domain = config.certificates.domain.clone();

    let sequencer = super::sequencer(config)?;
    sequencer.init_ssl(&certificates).await?;

    println!("certificate for {domain} ready; proxy restarted");
    Ok(0)
}
