//! Mutually exclusive proxy configuration variants.
//!
//! Exactly one variant is active at any time. Selection is driven by file
//! existence (certificate material present selects the TLS variant);
//! application is an idempotent render with a diff check, written via
//! temp file and atomic rename so the target is never partially applied.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::config::{ProxyConfig, VariantConfig};
use crate::error::{OrchestratorError, OrchestratorResult};

/// One of the mutually exclusive proxy configurations.
#[derive(Debug, Clone)]
pub struct ConfigVariant {
    /// Variant name.
    pub name: String,
    /// Template the target is rendered from.
    pub template_path: PathBuf,
    /// Files that must all exist for this variant to be selectable.
    pub required_artifacts: Vec<PathBuf>,
}

impl ConfigVariant {
    fn from_config(config: &VariantConfig) -> Self {
        Self {
            name: config.name.clone(),
            template_path: config.template_path.clone(),
            required_artifacts: config.required_artifacts.clone(),
        }
    }

    /// True if every required artifact exists. A variant with no required
    /// artifacts always resolves.
    #[must_use]
    pub fn artifacts_present(&self) -> bool {
        self.required_artifacts.iter().all(|path| path.exists())
    }
}

/// Whether an apply changed the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The target was rewritten.
    Changed,
    /// The target already held the rendered content; no write occurred.
    Unchanged,
}

/// Selects and atomically applies the active [`ConfigVariant`].
#[derive(Debug, Clone)]
pub struct ConfigSwitcher {
    variants: Vec<ConfigVariant>,
    default_variant: String,
    target_path: PathBuf,
    substitutions: BTreeMap<String, String>,
}

impl ConfigSwitcher {
    /// Create a switcher from proxy configuration.
    ///
    /// Fails if no variants are declared or the designated default is not
    /// among them.
    pub fn new(
        proxy: &ProxyConfig,
        substitutions: BTreeMap<String, String>,
    ) -> OrchestratorResult<Self> {
        if proxy.variants.is_empty() {
            return Err(OrchestratorError::config("no proxy variants declared"));
        }

        let variants: Vec<ConfigVariant> =
            proxy.variants.iter().map(ConfigVariant::from_config).collect();

        if !variants.iter().any(|v| v.name == proxy.default_variant) {
            return Err(OrchestratorError::config(format!(
                "default variant '{}' is not declared",
                proxy.default_variant
            )));
        }

        Ok(Self {
            variants,
            default_variant: proxy.default_variant.clone(),
            target_path: proxy.target_path.clone(),
            substitutions,
        })
    }

    /// Return the first variant whose required artifacts all resolve,
    /// falling back to the designated default.
    pub fn select_variant(&self) -> OrchestratorResult<&ConfigVariant> {
        for variant in &self.variants {
            if variant.artifacts_present() {
                debug!(variant = %variant.name, "selected config variant");
                return Ok(variant);
            }
        }

        self.variants
            .iter()
            .find(|v| v.name == self.default_variant)
            .ok_or_else(|| {
                // Unreachable: checked at construction.
                OrchestratorError::internal("default variant vanished")
            })
    }

    /// Render the variant into the target file.
    ///
    /// Idempotent: if the target already holds the rendered content no
    /// write happens, so repeated applies trigger no spurious proxy
    /// restarts. Writes go to a temp file followed by an atomic rename.
    pub async fn apply(&self, variant: &ConfigVariant) -> OrchestratorResult<Applied> {
        let template = tokio::fs::read_to_string(&variant.template_path)
            .await
            .map_err(|e| {
                OrchestratorError::config(format!(
                    "template {} unreadable: {e}",
                    variant.template_path.display()
                ))
            })?;

        let rendered = self.render(&template);

        if let Ok(current) = tokio::fs::read_to_string(&self.target_path).await {
            if current == rendered {
                debug!(variant = %variant.name, "target already up to date");
                return Ok(Applied::Unchanged);
            }
        }

        if let Some(parent) = self.target_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.target_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, rendered.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.target_path).await?;

        info!(
            variant = %variant.name,
            target = %self.target_path.display(),
            "applied config variant"
        );
        Ok(Applied::Changed)
    }

    /// Select the active variant and apply it.
    ///
    /// Returns the variant name and whether the target changed.
    pub async fn switch(&self) -> OrchestratorResult<(String, Applied)> {
        let variant = self.select_variant()?.clone();
        let applied = self.apply(&variant).await?;
        Ok((variant.name, applied))
    }

    fn render(&self, template: &str) -> String {
        let mut rendered = template.to_owned();
        for (key, value) in &self.substitutions {
            rendered = rendered.replace(&format!("${{{key}}}"), value);
        }
        rendered
    }
}
