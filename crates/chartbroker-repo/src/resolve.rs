use crate::index::{IndexFile, RepositoriesFile};
use crate::layout::RepoHome;
use crate::verify::{prov_path, verify_archive, Keyring};
use crate::{Credentials, Fetcher, RepoError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Optional knobs for [`Resolver::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Look the chart up in this repository's `index.yaml` instead of the cached indices.
    pub repo_url: Option<String>,
    pub credentials: Option<Credentials>,
    /// Exact version or semver requirement. `None` picks the latest.
    pub version: Option<String>,
    pub verify: bool,
    pub keyring: Option<PathBuf>,
}

/// Where a repository-relative chart can be downloaded from.
#[derive(Debug, Clone)]
struct ChartLocation {
    chart: String,
    version: String,
    url: String,
    credentials: Option<Credentials>,
}

/// Turns a package reference into an absolute path of a chart on disk.
///
/// Resolution order, first match wins:
/// 1. an existing local path (verified when requested)
/// 2. a path-shaped reference that does not exist is `NotFound`
/// 3. an entry under the repository directory of the home
/// 4. a repository-relative name, downloaded into the archive cache
pub struct Resolver {
    home: RepoHome,
    fetcher: Box<dyn Fetcher>,
}

impl Resolver {
    pub fn new(home: RepoHome, fetcher: Box<dyn Fetcher>) -> Self {
        Self { home, fetcher }
    }

    pub fn home(&self) -> &RepoHome {
        &self.home
    }

    pub fn resolve(&self, reference: &str, opts: &ResolveOptions) -> Result<PathBuf, RepoError> {
        let name = reference.trim();
        let version = opts
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let local = Path::new(name);
        if let Ok(meta) = fs::metadata(local) {
            let abs = std::path::absolute(local)?;
            if opts.verify {
                if meta.is_dir() {
                    return Err(RepoError::VerificationFailed(
                        "cannot verify a directory".to_owned(),
                    ));
                }
                verify_archive(&abs, &load_keyring(opts)?)?;
            }
            debug!("resolved {name} to local path {}", abs.display());
            return Ok(abs);
        }
        if local.is_absolute() || name.starts_with('.') {
            return Err(RepoError::NotFound(format!("path {name:?} not found")));
        }

        let cached = self.home.repository_dir().join(name);
        if cached.exists() {
            debug!("resolved {name} from repository cache");
            return Ok(std::path::absolute(cached)?);
        }

        let location = match opts.repo_url.as_deref() {
            Some(repo_url) => {
                self.locate_in_repo_url(repo_url, name, version, opts.credentials.clone())?
            }
            None => self.locate_in_cached_repos(name, version)?,
        };
        self.download(&location, opts)
    }

    fn locate_in_repo_url(
        &self,
        repo_url: &str,
        name: &str,
        version: Option<&str>,
        credentials: Option<Credentials>,
    ) -> Result<ChartLocation, RepoError> {
        let base = repo_url.trim_end_matches('/');
        let index_url = format!("{base}/index.yaml");
        let data = self.fetcher.fetch(&index_url, credentials.as_ref())?;
        let index = IndexFile::from_bytes(&data)?;
        let chart = index.get(name, version).ok_or_else(|| {
            RepoError::NotFound(format!(
                "chart {name} {} not found in {base}",
                version.unwrap_or("(latest)")
            ))
        })?;
        let first = chart
            .urls
            .first()
            .ok_or_else(|| RepoError::NotFound(format!("chart {name} has no download URL")))?;
        Ok(ChartLocation {
            chart: chart.name.clone(),
            version: chart.version.clone(),
            url: join_url(base, first)?,
            credentials,
        })
    }

    fn locate_in_cached_repos(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<ChartLocation, RepoError> {
        let Some((repo_name, chart_name)) = name.split_once('/') else {
            return Err(RepoError::NotFound(format!(
                "{name:?} is not a repository-relative chart name"
            )));
        };

        let repos_path = self.home.repositories_file();
        if !repos_path.exists() {
            return Err(RepoError::NotFound(format!(
                "no repositories configured; cannot find {name}"
            )));
        }
        let repos = RepositoriesFile::load(&repos_path)?;
        let repo = repos
            .get(repo_name)
            .ok_or_else(|| RepoError::NotFound(format!("repository {repo_name:?} not found")))?;

        let index = IndexFile::load(&self.home.cache_index(repo_name)).map_err(|e| {
            RepoError::NotFound(format!("no usable index for repository {repo_name:?}: {e}"))
        })?;
        let chart = index.get(chart_name, version).ok_or_else(|| {
            RepoError::NotFound(format!(
                "chart {name} {} not found",
                version.unwrap_or("(latest)")
            ))
        })?;
        let first = chart
            .urls
            .first()
            .ok_or_else(|| RepoError::NotFound(format!("chart {name} has no download URL")))?;
        Ok(ChartLocation {
            chart: chart.name.clone(),
            version: chart.version.clone(),
            url: join_url(&repo.url, first)?,
            credentials: repo.credentials(),
        })
    }

    fn download(&self, loc: &ChartLocation, opts: &ResolveOptions) -> Result<PathBuf, RepoError> {
        let dir = self.home.archive_dir();
        fs::create_dir_all(&dir)?;

        let data = self.fetcher.fetch(&loc.url, loc.credentials.as_ref())?;
        let dest = dir.join(format!("{}-{}.tgz", loc.chart, loc.version));
        write_atomic(&dir, &dest, &data)?;
        info!("downloaded {} {} to {}", loc.chart, loc.version, dest.display());

        if opts.verify {
            let prov_url = format!("{}.prov", loc.url);
            let checked = self
                .fetcher
                .fetch(&prov_url, loc.credentials.as_ref())
                .and_then(|prov| write_atomic(&dir, &prov_path(&dest), &prov))
                .and_then(|()| load_keyring(opts))
                .and_then(|keyring| verify_archive(&dest, &keyring));
            if let Err(e) = checked {
                warn!("discarding unverified archive {}: {e}", dest.display());
                let _ = fs::remove_file(&dest);
                let _ = fs::remove_file(prov_path(&dest));
                return Err(match e {
                    RepoError::VerificationFailed(_) => e,
                    other => RepoError::VerificationFailed(other.to_string()),
                });
            }
        }

        Ok(std::path::absolute(dest)?)
    }
}

fn load_keyring(opts: &ResolveOptions) -> Result<Keyring, RepoError> {
    let path = opts
        .keyring
        .as_deref()
        .ok_or_else(|| RepoError::VerificationFailed("no keyring configured".to_owned()))?;
    Keyring::load(path)
}

/// Join a possibly relative chart URL onto its repository base URL.
fn join_url(base: &str, chart_url: &str) -> Result<String, RepoError> {
    if url::Url::parse(chart_url).is_ok() {
        return Ok(chart_url.to_owned());
    }
    let base = url::Url::parse(&format!("{}/", base.trim_end_matches('/')))
        .map_err(|e| RepoError::Index(format!("invalid repository URL {base:?}: {e}")))?;
    base.join(chart_url)
        .map(String::from)
        .map_err(|e| RepoError::Index(format!("invalid chart URL {chart_url:?}: {e}")))
}

fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> Result<(), RepoError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| RepoError::Io(e.error))?;
    Ok(())
}
