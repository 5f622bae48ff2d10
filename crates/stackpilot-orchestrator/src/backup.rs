//! Snapshots and retention.
//!
//! A snapshot bundles a database dump, an optional asset archive and a
//! human-inspectable JSON manifest in one directory. Snapshots are
//! immutable once written; pruning removes whole snapshot directories
//! only, and always leaves the most recent one so at least one recovery
//! point exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::provider::DatabaseProvider;
use crate::types::SnapshotId;

const MANIFEST_FILE: &str = "manifest.json";
const DATABASE_FILE: &str = "database.sql";
const ASSETS_FILE: &str = "assets.tar.gz";

/// Result of one backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot identifier.
    pub id: SnapshotId,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Why the snapshot was taken (e.g. "manual", "pre-destructive").
    pub reason: String,
    /// Path of the database dump.
    pub database_artifact: PathBuf,
    /// Path of the asset archive, if asset directories were configured
    /// and present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_artifact: Option<PathBuf>,
    /// Total artifact size in bytes.
    pub size_bytes: u64,
    /// When the snapshot becomes eligible for pruning.
    pub retention_expiry: DateTime<Utc>,
}

/// Produces and retires snapshots.
pub struct BackupCoordinator {
    config: BackupConfig,
    database: Arc<dyn DatabaseProvider>,
}

impl BackupCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(config: BackupConfig, database: Arc<dyn DatabaseProvider>) -> Self {
        Self { config, database }
    }

    /// Take a snapshot: database dump, then best-effort asset archive,
    /// then manifest.
    ///
    /// The database dump is written to disk before the asset archive is
    /// attempted, so an archive failure is reported as an error while the
    /// dump is still retained for manual recovery.
    pub async fn snapshot(&self, reason: &str) -> OrchestratorResult<Snapshot> {
        let id = SnapshotId::generate();
        let created_at = Utc::now();
        let dir = self
            .config
            .dir
            .join(format!("{}-{id}", created_at.format("%Y%m%d-%H%M%S")));

        info!(snapshot = %id, reason = %reason, dir = %dir.display(), "taking snapshot");
        tokio::fs::create_dir_all(&dir).await?;

        let dump = self
            .database
            .dump()
            .await
            .map_err(|e| OrchestratorError::snapshot(format!("database dump failed: {e}")))?;

        let database_artifact = dir.join(DATABASE_FILE);
        tokio::fs::write(&database_artifact, &dump).await?;
        debug!(bytes = dump.len(), "database dump written");

        let asset_artifact = self.archive_assets(&dir).await?;

        let mut size_bytes = tokio::fs::metadata(&database_artifact).await?.len();
        if let Some(archive) = &asset_artifact {
            size_bytes += tokio::fs::metadata(archive).await?.len();
        }

        let snapshot = Snapshot {
            id,
            created_at,
            reason: reason.to_owned(),
            database_artifact,
            asset_artifact,
            size_bytes,
            retention_expiry: created_at
                + chrono::Duration::days(i64::from(self.config.retention_days)),
        };

        let manifest = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| OrchestratorError::serialisation(e.to_string()))?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest).await?;

        info!(
            snapshot = %snapshot.id,
            size_bytes = snapshot.size_bytes,
            "snapshot complete"
        );
        Ok(snapshot)
    }

    /// Delete snapshots whose retention expiry has passed.
    ///
    /// The most recent snapshot is never removed, even if expired.
    /// Returns the number of snapshots removed.
    pub async fn prune(&self) -> OrchestratorResult<usize> {
        let mut snapshots = self.list().await?;
        if snapshots.len() <= 1 {
            return Ok(0);
        }

        snapshots.sort_by_key(|(snapshot, _)| snapshot.created_at);
        // Keep the newest unconditionally.
        let newest = snapshots.len() - 1;

        let now = Utc::now();
        let mut removed = 0;
        for (snapshot, dir) in &snapshots[..newest] {
            if now > snapshot.retention_expiry {
                info!(snapshot = %snapshot.id, dir = %dir.display(), "pruning snapshot");
                tokio::fs::remove_dir_all(dir).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// All snapshots on disk with their directories, unordered.
    ///
    /// Directories without a parseable manifest are skipped with a
    /// warning rather than failing the sweep.
    pub async fn list(&self) -> OrchestratorResult<Vec<(Snapshot, PathBuf)>> {
        let mut snapshots = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }

            let manifest_path = dir.join(MANIFEST_FILE);
            match tokio::fs::read(&manifest_path).await {
                Ok(raw) => match serde_json::from_slice::<Snapshot>(&raw) {
                    Ok(snapshot) => snapshots.push((snapshot, dir)),
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "skipping unparseable manifest");
                    }
                },
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping snapshot without manifest");
                }
            }
        }

        Ok(snapshots)
    }

    /// Archive configured asset directories into the snapshot directory.
    ///
    /// Missing directories are skipped; if none exist there is nothing to
    /// archive and `None` is returned.
    async fn archive_assets(&self, dir: &Path) -> OrchestratorResult<Option<PathBuf>> {
        let present: Vec<&PathBuf> = self
            .config
            .asset_dirs
            .iter()
            .filter(|path| path.is_dir())
            .collect();

        if present.is_empty() {
            debug!("no asset directories present, skipping archive");
            return Ok(None);
        }

        let archive = dir.join(ASSETS_FILE);
        let mut command = Command::new("tar");
        command
            .arg("-czf")
            .arg(&archive)
            .args(present.iter().map(|p| p.as_os_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.archive_timeout_secs);
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                OrchestratorError::snapshot(format!(
                    "asset archive timed out after {}s (database dump retained)",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| OrchestratorError::snapshot(format!("failed to run tar: {e}")))?;

        if output.status.success() {
            Ok(Some(archive))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(OrchestratorError::snapshot(format!(
                "asset archive failed (database dump retained): {}",
                stderr.lines().last().unwrap_or("")
            )))
        }
    }
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("dir", &self.config.dir)
            .field("retention_days", &self.config.retention_days)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockDatabaseProvider;

    fn coordinator(dir: &Path) -> (BackupCoordinator, Arc<MockDatabaseProvider>) {
        let database = Arc::new(MockDatabaseProvider::default());
        let config = BackupConfig {
            dir: dir.to_path_buf(),
            asset_dirs: Vec::new(),
            retention_days: 7,
            archive_timeout_secs: 10,
        };
        (BackupCoordinator::new(config, database.clone()), database)
    }

    #[tokio::test]
    async fn snapshot_writes_dump_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        let snapshot = coordinator.snapshot("manual").await.unwrap();
        assert!(snapshot.database_artifact.exists());
        assert!(snapshot.asset_artifact.is_none());
        assert!(snapshot.size_bytes > 0);
        assert!(snapshot.retention_expiry > snapshot.created_at);

        let listed = coordinator.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.reason, "manual");
    }

    #[tokio::test]
    async fn dump_failure_aborts_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, database) = coordinator(dir.path());
        database.set_fail_dump(true);

        let error = coordinator.snapshot("manual").await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Snapshot(_)));
    }

    #[tokio::test]
    async fn prune_never_removes_most_recent_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        coordinator.snapshot("first").await.unwrap();
        coordinator.snapshot("second").await.unwrap();
        coordinator.snapshot("third").await.unwrap();

        // Expire all three by rewriting their manifests.
        for (mut snapshot, snapshot_dir) in coordinator.list().await.unwrap() {
            snapshot.retention_expiry = Utc::now() - chrono::Duration::days(1);
            // Make creation times distinct and ordered by reason.
            snapshot.created_at = match snapshot.reason.as_str() {
                "first" => Utc::now() - chrono::Duration::days(3),
                "second" => Utc::now() - chrono::Duration::days(2),
                _ => Utc::now() - chrono::Duration::days(1),
            };
            let manifest = serde_json::to_vec_pretty(&snapshot).unwrap();
            std::fs::write(snapshot_dir.join(MANIFEST_FILE), manifest).unwrap();
        }

        let removed = coordinator.prune().await.unwrap();
        assert_eq!(removed, 2);

        let remaining = coordinator.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0.reason, "third");
    }

    #[tokio::test]
    async fn prune_keeps_unexpired_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _) = coordinator(dir.path());

        coordinator.snapshot("a").await.unwrap();
        coordinator.snapshot("b").await.unwrap();

        // Nothing expired yet.
        assert_eq!(coordinator.prune().await.unwrap(), 0);
        assert_eq!(coordinator.list().await.unwrap().len(), 2);
    }
}
