//! Release manager seam for chartbroker.
//!
//! The broker never installs anything itself. It drives a [`ReleaseManager`]
//! keyed by release name: install, delete, upgrade, status and history. This
//! crate defines that trait, the release record and status codes, and ships
//! two managers: [`MemoryReleaseManager`] for tests and dry runs, and
//! [`HttpReleaseManager`] for a remote release-manager endpoint.

pub mod http;
pub mod memory;
pub mod status;

pub use http::{HttpReleaseManager, ManagerEndpoint};
pub use memory::MemoryReleaseManager;
pub use status::StatusCode;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Timeout handed to the release manager for install, upgrade and delete.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Override values passed to the chart templates.
pub type Values = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("release: {0} not found")]
    NotFound(String),
    #[error("release {0} already exists")]
    AlreadyExists(String),
    #[error("cannot load chart: {0}")]
    Chart(String),
    #[error("release manager error: {0}")]
    Upstream(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("release manager I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chart a release was created from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub name: String,
    pub version: String,
}

impl ChartRef {
    /// Derive name and version from an archive or chart directory path:
    /// `.../app-1.2.0.tgz` is `app` at `1.2.0`; `.../app` is `app` with no version.
    pub fn from_path(path: &Path) -> Self {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = file
            .strip_suffix(".tgz")
            .or_else(|| file.strip_suffix(".tar.gz"))
            .unwrap_or(&file);
        let split = stem
            .char_indices()
            .filter(|&(i, c)| c == '-' && stem[i + 1..].starts_with(|d: char| d.is_ascii_digit()))
            .map(|(i, _)| i)
            .next();
        match split {
            Some(i) => Self {
                name: stem[..i].to_owned(),
                version: stem[i + 1..].to_owned(),
            },
            None => Self {
                name: stem.to_owned(),
                version: String::new(),
            },
        }
    }
}

/// The release manager's record of one revision of a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    pub chart: ChartRef,
    pub status: StatusCode,
    pub revision: u32,
    #[serde(default)]
    pub values: Values,
    pub updated: String,
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub chart_path: PathBuf,
    pub namespace: String,
    pub release_name: String,
    pub values: Values,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub release_name: String,
    pub chart_path: PathBuf,
    pub values: Values,
    pub timeout: Duration,
}

pub trait ReleaseManager: Send + Sync {
    fn name(&self) -> &str;

    /// Install a chart as a new release.
    fn install(&self, req: &InstallRequest) -> Result<Release, ReleaseError>;

    /// Delete a release. With `purge`, its history is removed as well.
    fn delete(&self, name: &str, purge: bool, timeout: Duration) -> Result<Release, ReleaseError>;

    /// Upgrade an existing release to a new chart and values.
    fn upgrade(&self, req: &UpgradeRequest) -> Result<Release, ReleaseError>;

    /// Latest revision of a release.
    fn status(&self, name: &str) -> Result<Release, ReleaseError>;

    /// Up to `max` revisions, newest first.
    fn history(&self, name: &str, max: usize) -> Result<Vec<Release>, ReleaseError>;
}

/// Which release manager the broker talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ManagerConfig {
    #[default]
    Memory,
    Http(ManagerEndpoint),
}

pub fn select_manager(config: &ManagerConfig) -> Box<dyn ReleaseManager> {
    match config {
        ManagerConfig::Memory => Box::new(MemoryReleaseManager::new()),
        ManagerConfig::Http(endpoint) => Box::new(HttpReleaseManager::new(endpoint.clone())),
    }
}
