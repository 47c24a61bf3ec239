use crate::identity::IdStrategy;
use crate::BrokerError;
use chartbroker_release::ManagerConfig;
use chartbroker_repo::ResolveOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Broker settings, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Repository home holding `repository/repositories.yaml` and the caches.
    pub home: PathBuf,
    /// Report operations as asynchronous when the caller accepts it.
    pub async_mode: bool,
    pub id_strategy: IdStrategy,
    /// Require a provenance file for every archive that gets installed.
    pub verify: bool,
    pub keyring: Option<PathBuf>,
    pub release_manager: ManagerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            async_mode: false,
            id_strategy: IdStrategy::Name,
            verify: false,
            keyring: None,
            release_manager: ManagerConfig::Memory,
        }
    }
}

impl BrokerConfig {
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Like [`BrokerConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, BrokerError> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self, BrokerError> {
        toml::from_str(content).map_err(|e| BrokerError::Config(format!("invalid config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), BrokerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BrokerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            verify: self.verify,
            keyring: self.keyring.clone(),
            ..ResolveOptions::default()
        }
    }
}

/// `$HOME/.chartbroker`, or `.chartbroker` when `HOME` is unset.
pub fn default_home() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".chartbroker")
}
