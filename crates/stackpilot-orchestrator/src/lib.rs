//! Deployment orchestration for a Docker-Compose-managed web stack.
//!
//! This crate replaces a pile of per-environment shell scripts with one
//! engine built from a few cooperating parts:
//!
//! - **Graph**: the declared services, their tiers and dependencies,
//!   validated into a topological order
//! - **Probes**: bounded readiness checks (TCP, HTTP, in-container exec)
//! - **Strategies**: named operational goals expanded into ordered step
//!   lists (full deploy, rolling update, database reset, backup)
//! - **Sequencer**: executes a strategy's steps with per-step failure
//!   policy, destructive-step gating and a persisted run report
//! - **Switcher**: atomic selection between mutually exclusive proxy
//!   configuration variants
//! - **Backups**: database dumps plus asset archives with retention
//!
//! External tools (`docker compose`, `pg_dump`, `certbot`) sit behind the
//! provider traits in [`provider`], so everything above them is testable
//! without a container runtime.

pub mod backup;
pub mod config;
pub mod error;
pub mod graph;
pub mod probe;
pub mod provider;
pub mod report;
pub mod sequencer;
pub mod step;
pub mod strategy;
pub mod switcher;
pub mod types;

pub use backup::{BackupCoordinator, Snapshot};
pub use config::StackConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use graph::{ServiceGraph, ServiceSpec, ServiceTier};
pub use probe::{HealthProbe, Probe, ProbeKind, WaitOutcome};
pub use provider::{
    CertbotProvider, CertificateProvider, ComposeProvider, ContainerProvider, DatabaseProvider,
    PgProvider,
};
pub use report::{RunReport, RunStatus, StepOutcome};
pub use sequencer::{CancelFlag, DeploymentSequencer, RunOptions};
pub use step::{Action, DeploymentStep, OnFailure};
pub use strategy::Strategy;
pub use switcher::{Applied, ConfigSwitcher};
pub use types::{RunId, ServiceName, SnapshotId};
