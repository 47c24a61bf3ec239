//! Repository index and repositories file formats.
//!
//! Both files are YAML. An index maps chart names to every published version of
//! that chart; the repositories file lists the configured repositories by name
//! and URL. Version strings are compared as semver where possible, accepting the
//! short `1.0` / `v1.2` forms that chart authors commonly publish.

use crate::{Credentials, RepoError};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const API_VERSION: &str = "v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One published version of a chart, as listed in a repository index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub home: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub app_version: String,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub kube_version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub created: String,
    #[serde(default)]
    pub removed: bool,
    #[serde(default)]
    pub digest: String,
}

/// Accept any YAML scalar where a string is expected (`version: 1.0` is a float in YAML).
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!("expected a scalar, got {other:?}"))),
    }
}

/// Parse a version leniently: `v` prefix allowed, missing minor/patch filled with zero.
pub fn parse_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    if let Ok(v) = semver::Version::parse(trimmed) {
        return Some(v);
    }
    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let padded = match core.matches('.').count() {
        0 => format!("{core}.0.0{rest}"),
        1 => format!("{core}.0{rest}"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

/// Order two version strings. Semver beats non-semver; two non-semver strings compare lexically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub generated: String,
}

impl IndexFile {
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, RepoError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RepoError> {
        let index: Self =
            serde_yaml::from_slice(data).map_err(|e| RepoError::Index(e.to_string()))?;
        if index.api_version.is_empty() {
            return Err(RepoError::Index("no API version specified".to_owned()));
        }
        Ok(index)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RepoError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| RepoError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), RepoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn add(&mut self, chart: ChartVersion) {
        self.entries.entry(chart.name.clone()).or_default().push(chart);
    }

    /// Highest published version of `name`.
    pub fn latest(&self, name: &str) -> Option<&ChartVersion> {
        self.entries
            .get(name)?
            .iter()
            .max_by(|a, b| compare_versions(&a.version, &b.version))
    }

    /// Look up `name` at `version`. `None` picks the latest; an exact string match
    /// wins, otherwise the version is read as a semver requirement.
    pub fn get(&self, name: &str, version: Option<&str>) -> Option<&ChartVersion> {
        let Some(wanted) = version.map(str::trim).filter(|v| !v.is_empty()) else {
            return self.latest(name);
        };
        let versions = self.entries.get(name)?;
        if let Some(exact) = versions.iter().find(|c| c.version == wanted) {
            return Some(exact);
        }
        let req = semver::VersionReq::parse(wanted).ok()?;
        versions
            .iter()
            .filter_map(|c| parse_version(&c.version).map(|v| (v, c)))
            .filter(|(v, _)| req.matches(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, c)| c)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Repository {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_owned(),
            url: url.trim_end_matches('/').to_owned(),
            ..Self::default()
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// The list of configured repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoriesFile {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub generated: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl RepositoriesFile {
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION.to_owned(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, RepoError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, RepoError> {
        serde_yaml::from_slice(data)
            .map_err(|e| RepoError::Index(format!("invalid repositories file: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RepoError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| RepoError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), RepoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Add a repository, replacing any existing entry with the same name.
    pub fn add(&mut self, repo: Repository) {
        if let Some(existing) = self.repositories.iter_mut().find(|r| r.name == repo.name) {
            *existing = repo;
        } else {
            self.repositories.push(repo);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_YAML: &str = r"
apiVersion: v1
entries:
  app:
    - name: app
      version: 1.0
      description: Team application
      digest: 0123456789abcdef0123456789abcdef
      urls:
        - app-1.0.tgz
    - name: app
      version: 1.2.0
      description: Team application
      urls:
        - app-1.2.0.tgz
  db:
    - name: db
      version: v0.3
      appVersion: 5.7
      keywords: [database, sql]
generated: 2024-01-01T00:00:00Z
";

    #[test]
    fn index_parses_numeric_versions() {
        let index = IndexFile::from_bytes(INDEX_YAML.as_bytes()).unwrap();
        let app = &index.entries["app"];
        assert_eq!(app[0].version, "1.0");
        assert_eq!(index.entries["db"][0].app_version, "5.7");
        assert_eq!(index.entries["db"][0].keywords, vec!["database", "sql"]);
    }

    #[test]
    fn index_without_api_version_is_rejected() {
        let err = IndexFile::from_bytes(b"entries: {}\n").unwrap_err();
        assert!(err.to_string().contains("no API version"));
    }

    #[test]
    fn corrupt_index_is_rejected() {
        assert!(IndexFile::from_bytes(b"apiVersion: [unterminated").is_err());
    }

    #[test]
    fn latest_picks_highest_semver() {
        let index = IndexFile::from_bytes(INDEX_YAML.as_bytes()).unwrap();
        assert_eq!(index.latest("app").unwrap().version, "1.2.0");
        assert!(index.latest("missing").is_none());
    }

    #[test]
    fn get_exact_and_requirement() {
        let index = IndexFile::from_bytes(INDEX_YAML.as_bytes()).unwrap();
        assert_eq!(index.get("app", Some("1.0")).unwrap().version, "1.0");
        assert_eq!(index.get("app", Some("^1.1")).unwrap().version, "1.2.0");
        assert_eq!(index.get("app", None).unwrap().version, "1.2.0");
        assert_eq!(index.get("app", Some("  ")).unwrap().version, "1.2.0");
        assert!(index.get("app", Some("2.0.0")).is_none());
    }

    #[test]
    fn lenient_version_parsing() {
        assert_eq!(parse_version("1.0").unwrap(), semver::Version::new(1, 0, 0));
        assert_eq!(parse_version("v0.3").unwrap(), semver::Version::new(0, 3, 0));
        assert_eq!(parse_version("2").unwrap(), semver::Version::new(2, 0, 0));
        assert!(parse_version("latest").is_none());
    }

    #[test]
    fn semver_beats_non_semver() {
        assert_eq!(compare_versions("0.0.1", "nightly"), Ordering::Greater);
        assert_eq!(compare_versions("alpha", "beta"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
    }

    #[test]
    fn index_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("team-index.yaml");

        let mut index = IndexFile::new();
        index.add(ChartVersion {
            name: "app".to_owned(),
            version: "1.0.0".to_owned(),
            urls: vec!["https://charts.example.com/app-1.0.0.tgz".to_owned()],
            ..ChartVersion::default()
        });
        index.save(&path).unwrap();

        let loaded = IndexFile::load(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn repositories_add_replaces_by_name() {
        let mut file = RepositoriesFile::new();
        file.add(Repository::new("team", "https://old.example.com/"));
        file.add(Repository::new("team", "https://new.example.com"));
        file.add(Repository::new("stable", "https://stable.example.com"));

        assert_eq!(file.repositories.len(), 2);
        assert_eq!(file.get("team").unwrap().url, "https://new.example.com");
        assert!(file.get("missing").is_none());
    }

    #[test]
    fn repository_credentials_require_both_fields() {
        let mut repo = Repository::new("team", "https://charts.example.com");
        assert!(repo.credentials().is_none());
        repo.username = Some("ci".to_owned());
        assert!(repo.credentials().is_none());
        repo.password = Some("hunter2".to_owned());
        assert_eq!(repo.credentials().unwrap().username, "ci");
    }

    #[test]
    fn repositories_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.yaml");

        let mut file = RepositoriesFile::new();
        file.add(Repository::new("team", "https://charts.example.com"));
        file.save(&path).unwrap();

        let loaded = RepositoriesFile::load(&path).unwrap();
        assert_eq!(loaded, file);
    }
}
