use crate::index::{compare_versions, ChartVersion, IndexFile, RepositoriesFile};
use crate::layout::RepoHome;
use crate::RepoError;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A chart found in the merged index, keyed as `repo/chart`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub name: String,
    pub chart: ChartVersion,
}

/// Merged, deduplicated view over every configured repository index.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    charts: BTreeMap<String, ChartVersion>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the repositories file of `home` and merge each repository's cached index.
    ///
    /// A missing repositories file yields an empty index. A missing or corrupt
    /// cached index is skipped with a warning.
    pub fn from_home(home: &RepoHome) -> Result<Self, RepoError> {
        let mut index = Self::new();
        let repo_file = home.repositories_file();
        if !repo_file.exists() {
            warn!(
                "no repositories file at {}; catalog is empty",
                repo_file.display()
            );
            return Ok(index);
        }

        let repos = RepositoriesFile::load(&repo_file)?;
        for repo in &repos.repositories {
            let path = home.cache_index(&repo.name);
            match IndexFile::load(&path) {
                Ok(ind) => index.add_repo(&repo.name, &ind),
                Err(e) => {
                    warn!("repository '{}' is corrupt or missing: {e}", repo.name);
                }
            }
        }
        Ok(index)
    }

    /// Merge the latest version of every chart in `index` under `repo_name/`.
    /// A chart already present keeps whichever version is higher.
    pub fn add_repo(&mut self, repo_name: &str, index: &IndexFile) {
        for name in index.entries.keys() {
            let Some(latest) = index.latest(name) else {
                continue;
            };
            let key = format!("{repo_name}/{name}");
            let newer = self
                .charts
                .get(&key)
                .map_or(true, |existing| {
                    compare_versions(&latest.version, &existing.version) == Ordering::Greater
                });
            if newer {
                debug!("indexed {key} {}", latest.version);
                self.charts.insert(key, latest.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// Every indexed chart, sorted by name.
    pub fn all(&self) -> Vec<SearchResult> {
        self.charts
            .iter()
            .map(|(name, chart)| SearchResult {
                name: name.clone(),
                chart: chart.clone(),
            })
            .collect()
    }
}
