//! Database dump provider backed by `pg_dump`/`pg_isready` inside the
//! database service container.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::{ContainerProvider, DatabaseProvider};
use crate::types::ServiceName;

const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs PostgreSQL tooling inside the stack's database container, the way
/// an operator would with `docker compose exec db pg_dump`.
pub struct PgProvider {
    container: Arc<dyn ContainerProvider>,
    service: ServiceName,
    config: DatabaseConfig,
}

impl PgProvider {
    /// Create a provider for the configured database.
    #[must_use]
    pub fn new(container: Arc<dyn ContainerProvider>, config: DatabaseConfig) -> Self {
        Self {
            container,
            service: ServiceName::new(config.service.clone()),
            config,
        }
    }
}

#[async_trait]
impl DatabaseProvider for PgProvider {
    async fn dump(&self) -> OrchestratorResult<Vec<u8>> {
        let command = vec![
            "pg_dump".to_owned(),
            "-U".to_owned(),
            self.config.user.clone(),
            "--clean".to_owned(),
            "--if-exists".to_owned(),
            self.config.name.clone(),
        ];

        debug!(database = %self.config.name, "dumping database");

        let output = self
            .container
            .exec(
                &self.service,
                &command,
                Duration::from_secs(self.config.dump_timeout_secs),
            )
            .await?;

        if output.success() {
            Ok(output.stdout.into_bytes())
        } else {
            Err(OrchestratorError::external(
                "pg_dump",
                Some(output.exit_code),
                output.last_stderr_line().to_owned(),
            ))
        }
    }

    async fn is_ready(&self) -> OrchestratorResult<bool> {
        let command = vec![
            "pg_isready".to_owned(),
            "-U".to_owned(),
            self.config.user.clone(),
        ];

        let output = self
            .container
            .exec(&self.service, &command, READY_CHECK_TIMEOUT)
            .await?;

        Ok(output.success())
    }
}

impl std::fmt::Debug for PgProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgProvider")
            .field("service", &self.service)
            .field("database", &self.config.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockContainerProvider;

    #[tokio::test]
    async fn dump_runs_pg_dump_in_db_container() {
        let mock = Arc::new(MockContainerProvider::default());
        let provider = PgProvider::new(mock.clone(), DatabaseConfig::default());

        provider.dump().await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("exec db pg_dump -U postgres"));
    }

    #[tokio::test]
    async fn dump_failure_surfaces_stderr() {
        let mock = Arc::new(MockContainerProvider::default());
        mock.fail_exec("db", "pg_dump", 1);

        let provider = PgProvider::new(mock, DatabaseConfig::default());
        let error = provider.dump().await.unwrap_err();
        assert!(error.to_string().contains("pg_dump"));
    }

    #[tokio::test]
    async fn is_ready_reflects_exit_code() {
        let mock = Arc::new(MockContainerProvider::default());
        let provider = PgProvider::new(mock.clone(), DatabaseConfig::default());
        assert!(provider.is_ready().await.unwrap());

        mock.fail_exec("db", "pg_isready", 1);
        assert!(!provider.is_ready().await.unwrap());
    }
}
