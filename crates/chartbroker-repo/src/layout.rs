use crate::RepoError;
use std::fs;
use std::path::PathBuf;

/// Directory layout of a chart repository home.
///
/// ```text
/// <root>/repository/repositories.yaml
/// <root>/repository/cache/<name>-index.yaml
/// <root>/repository/cache/archive/
/// <root>/repository/local/
/// ```
///
/// Directories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct RepoHome {
    root: PathBuf,
}

impl RepoHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Packages named relative to this directory resolve without a download.
    #[inline]
    pub fn repository_dir(&self) -> PathBuf {
        self.root.join("repository")
    }

    #[inline]
    pub fn repositories_file(&self) -> PathBuf {
        self.repository_dir().join("repositories.yaml")
    }

    #[inline]
    pub fn cache_dir(&self) -> PathBuf {
        self.repository_dir().join("cache")
    }

    #[inline]
    pub fn cache_index(&self, repo_name: &str) -> PathBuf {
        self.cache_dir().join(format!("{repo_name}-index.yaml"))
    }

    /// Download target for fetched chart archives.
    #[inline]
    pub fn archive_dir(&self) -> PathBuf {
        self.cache_dir().join("archive")
    }

    #[inline]
    pub fn local_dir(&self) -> PathBuf {
        self.repository_dir().join("local")
    }

    pub fn initialize(&self) -> Result<(), RepoError> {
        fs::create_dir_all(self.cache_dir())?;
        fs::create_dir_all(self.archive_dir())?;
        fs::create_dir_all(self.local_dir())?;
        Ok(())
    }
}
