//! Configuration for the stackpilot orchestrator.
//!
//! All orchestration state comes from one immutable [`StackConfig`] loaded
//! at startup; nothing reads ambient environment variables at run time.
//! Configuration is merged from defaults, `stackpilot.toml` and
//! `STACKPILOT_`-prefixed environment variables, later sources overriding
//! earlier ones.

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::graph::{RestartPolicy, ServiceSpec, ServiceTier};
use crate::probe::Probe;
use crate::types::ServiceName;

/// Top-level configuration for the sequencer.
#[derive(Debug, Clone, Deserialize)]
pub struct StackConfig {
    /// Compose project settings.
    #[serde(default)]
    pub project: ProjectConfig,

    /// The deployable services and their topology.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,

    /// Database access for dumps and readiness checks.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Snapshot storage and retention.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Reverse-proxy configuration variants.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Run report persistence.
    #[serde(default)]
    pub reports: ReportConfig,

    /// Certificate issuance settings.
    #[serde(default)]
    pub certificates: CertificateConfig,
}

impl StackConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `stackpilot.toml` in the current directory (if present)
    /// 3. Environment variables with `STACKPILOT_` prefix
    pub fn load() -> OrchestratorResult<Self> {
        Figment::new()
            .merge(Toml::file("stackpilot.toml"))
            .merge(Env::prefixed("STACKPILOT_").split("__"))
            .extract()
            .map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> OrchestratorResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STACKPILOT_").split("__"))
            .extract()
            .map_err(|e| OrchestratorError::Config(e.to_string()))
    }

    /// Template substitutions applied by the config switcher.
    #[must_use]
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("DOMAIN".to_owned(), self.certificates.domain.clone()),
            ("PROJECT".to_owned(), self.project.name.clone()),
        ])
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            services: default_services(),
            database: DatabaseConfig::default(),
            backup: BackupConfig::default(),
            proxy: ProxyConfig::default(),
            reports: ReportConfig::default(),
            certificates: CertificateConfig::default(),
        }
    }
}

/// Compose project settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Compose project name (`docker compose -p`).
    #[serde(default = "default_project_name")]
    pub name: String,

    /// Path to the compose file (`docker compose -f`).
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,

    /// Service that runs management commands (migrations, static
    /// collection).
    #[serde(default = "default_app_service")]
    pub app_service: String,

    /// Timeout for a single container-lifecycle command, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_project_name() -> String {
    "stack".to_owned()
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_app_service() -> String {
    "api".to_owned()
}

const fn default_command_timeout_secs() -> u64 {
    600
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            compose_file: default_compose_file(),
            app_service: default_app_service(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Database access for dumps and readiness checks, executed inside the
/// database service container.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the database service in the stack.
    #[serde(default = "default_db_service")]
    pub service: String,

    /// Database user.
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Database name.
    #[serde(default = "default_db_name")]
    pub name: String,

    /// Timeout for a full dump, in seconds.
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,
}

fn default_db_service() -> String {
    "db".to_owned()
}

fn default_db_user() -> String {
    "postgres".to_owned()
}

fn default_db_name() -> String {
    "postgres".to_owned()
}

const fn default_dump_timeout_secs() -> u64 {
    300
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            service: default_db_service(),
            user: default_db_user(),
            name: default_db_name(),
            dump_timeout_secs: default_dump_timeout_secs(),
        }
    }
}

/// Snapshot storage and retention.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Directory snapshots are written under.
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Asset directories archived alongside the database dump. Missing
    /// directories are skipped.
    #[serde(default = "default_asset_dirs")]
    pub asset_dirs: Vec<PathBuf>,

    /// How long snapshots are retained, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Timeout for the asset archive step, in seconds.
    #[serde(default = "default_archive_timeout_secs")]
    pub archive_timeout_secs: u64,
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_asset_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("media")]
}

const fn default_retention_days() -> u32 {
    7
}

const fn default_archive_timeout_secs() -> u64 {
    600
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            asset_dirs: default_asset_dirs(),
            retention_days: default_retention_days(),
            archive_timeout_secs: default_archive_timeout_secs(),
        }
    }
}

/// One reverse-proxy configuration variant.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    /// Variant name (e.g. "tls", "http").
    pub name: String,

    /// Template the target file is rendered from.
    pub template_path: PathBuf,

    /// Files that must all exist for this variant to be selectable.
    #[serde(default)]
    pub required_artifacts: Vec<PathBuf>,
}

/// Reverse-proxy configuration switching.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Configuration file the active variant is rendered into.
    #[serde(default = "default_proxy_target")]
    pub target_path: PathBuf,

    /// Variant used when no candidate's required artifacts resolve.
    #[serde(default = "default_variant_name")]
    pub default_variant: String,

    /// Candidate variants, checked in order.
    #[serde(default = "default_variants")]
    pub variants: Vec<VariantConfig>,
}

fn default_proxy_target() -> PathBuf {
    PathBuf::from("nginx/conf.d/default.conf")
}

fn default_variant_name() -> String {
    "http".to_owned()
}

fn default_variants() -> Vec<VariantConfig> {
    let live = PathBuf::from("/etc/letsencrypt/live").join(default_domain());
    vec![
        VariantConfig {
            name: "tls".to_owned(),
            template_path: PathBuf::from("nginx/templates/tls.conf"),
            required_artifacts: vec![
                live.join("fullchain.pem"),
                live.join("privkey.pem"),
                live.join("chain.pem"),
            ],
        },
        VariantConfig {
            name: "http".to_owned(),
            template_path: PathBuf::from("nginx/templates/http.conf"),
            required_artifacts: Vec::new(),
        },
    ]
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target_path: default_proxy_target(),
            default_variant: default_variant_name(),
            variants: default_variants(),
        }
    }
}

/// Run report persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Directory run reports are written under.
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_report_dir(),
        }
    }
}

/// Certificate issuance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateConfig {
    /// Domain the certificate covers.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Contact email for issuance.
    #[serde(default)]
    pub email: String,

    /// Directory certbot places live certificates under.
    #[serde(default = "default_live_dir")]
    pub live_dir: PathBuf,

    /// Webroot served for HTTP-01 challenges.
    #[serde(default = "default_webroot")]
    pub webroot: PathBuf,

    /// Timeout for an issuance run, in seconds.
    #[serde(default = "default_issue_timeout_secs")]
    pub issue_timeout_secs: u64,
}

fn default_domain() -> String {
    "example.com".to_owned()
}

fn default_live_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt/live")
}

fn default_webroot() -> PathBuf {
    PathBuf::from("certbot/www")
}

const fn default_issue_timeout_secs() -> u64 {
    180
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            email: String::new(),
            live_dir: default_live_dir(),
            webroot: default_webroot(),
            issue_timeout_secs: default_issue_timeout_secs(),
        }
    }
}

/// The canonical six-service topology: database and cache first, the
/// Django/Celery app tier on top, nginx last.
fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: ServiceName::new("db"),
            start_order: 10,
            tier: ServiceTier::Infra,
            depends_on: Vec::new(),
            restart_policy: RestartPolicy::Always,
            probe: Some(Probe::exec("pg_isready -U postgres")),
        },
        ServiceSpec {
            name: ServiceName::new("redis"),
            start_order: 10,
            tier: ServiceTier::Infra,
            depends_on: Vec::new(),
            restart_policy: RestartPolicy::Always,
            probe: Some(Probe::exec("redis-cli ping")),
        },
        ServiceSpec {
            name: ServiceName::new("api"),
            start_order: 20,
            tier: ServiceTier::App,
            depends_on: vec![ServiceName::new("db"), ServiceName::new("redis")],
            restart_policy: RestartPolicy::Always,
            probe: Some(Probe::exec("curl -sf http://localhost:8000/api/health/")),
        },
        ServiceSpec {
            name: ServiceName::new("celery"),
            start_order: 30,
            tier: ServiceTier::App,
            depends_on: vec![ServiceName::new("api")],
            restart_policy: RestartPolicy::Always,
            probe: None,
        },
        ServiceSpec {
            name: ServiceName::new("celery-beat"),
            start_order: 40,
            tier: ServiceTier::App,
            depends_on: vec![ServiceName::new("celery")],
            restart_policy: RestartPolicy::Always,
            probe: None,
        },
        ServiceSpec {
            name: ServiceName::new("nginx"),
            start_order: 50,
            tier: ServiceTier::Proxy,
            depends_on: vec![ServiceName::new("api")],
            restart_policy: RestartPolicy::Always,
            probe: Some(Probe::tcp("127.0.0.1:80")),
        },
    ]
}
