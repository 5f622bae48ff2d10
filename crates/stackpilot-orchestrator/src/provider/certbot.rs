//! Certificate provider backed by the certbot CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::CertificateConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::CertificateProvider;

const CERTIFICATE_ARTIFACTS: [&str; 3] = ["fullchain.pem", "privkey.pem", "chain.pem"];

/// Issues certificates via `certbot certonly --webroot` and checks for the
/// complete live artifact set on disk.
#[derive(Debug, Clone)]
pub struct CertbotProvider {
    live_dir: PathBuf,
    webroot: PathBuf,
    issue_timeout: Duration,
}

impl CertbotProvider {
    /// Create a provider from certificate configuration.
    ///
    /// Fails if the `certbot` binary is not on the PATH.
    pub fn new(config: &CertificateConfig) -> OrchestratorResult<Self> {
        if which::which("certbot").is_err() {
            return Err(OrchestratorError::config(
                "certbot not found on PATH; install certbot or adjust PATH",
            ));
        }

        Ok(Self {
            live_dir: config.live_dir.clone(),
            webroot: config.webroot.clone(),
            issue_timeout: Duration::from_secs(config.issue_timeout_secs),
        })
    }
}

#[async_trait]
impl CertificateProvider for CertbotProvider {
    async fn has_valid_certificate(&self, domain: &str) -> OrchestratorResult<bool> {
        let domain_dir = self.live_dir.join(domain);
        for artifact in CERTIFICATE_ARTIFACTS {
            if !domain_dir.join(artifact).exists() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn issue(&self, domain: &str, email: &str) -> OrchestratorResult<()> {
        info!(domain = %domain, "requesting certificate");

        let mut command = Command::new("certbot");
        command
            .args([
                "certonly",
                "--webroot",
                "-w",
                &self.webroot.display().to_string(),
                "-d",
                domain,
                "--email",
                email,
                "--agree-tos",
                "--non-interactive",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.issue_timeout, command.output())
            .await
            .map_err(|_| {
                OrchestratorError::external(
                    "certbot certonly",
                    None,
                    format!("timed out after {}s", self.issue_timeout.as_secs()),
                )
            })?
            .map_err(|e| OrchestratorError::external("certbot certonly", None, e.to_string()))?;

        if output.status.success() {
            info!(domain = %domain, "certificate issued");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("")
                .to_owned();
            Err(OrchestratorError::external(
                "certbot certonly",
                output.status.code(),
                detail,
            ))
        }
    }
}
