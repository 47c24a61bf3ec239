//! Chart repository access for chartbroker.
//!
//! This crate owns everything between a package reference and a chart archive
//! on disk: the repository home layout (`RepoHome`), YAML repository and index
//! files, a merged search index over all configured repositories, an HTTP
//! fetcher for index and archive downloads, blake3 provenance verification,
//! and the `Resolver` that turns a reference into an absolute archive path.

pub mod http;
pub mod index;
pub mod layout;
pub mod resolve;
pub mod search;
pub mod verify;

pub use http::HttpFetcher;
pub use index::{ChartVersion, IndexFile, Maintainer, RepositoriesFile, Repository};
pub use layout::RepoHome;
pub use resolve::{ResolveOptions, Resolver};
pub use search::{SearchIndex, SearchResult};
pub use verify::{prov_path, sign_archive, verify_archive, Keyring, Provenance};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("invalid index: {0}")]
    Index(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Basic-auth credentials for a chart repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Transport used to fetch repository indices, archives and provenance files.
pub trait Fetcher: Send + Sync {
    /// Fetch the full body at `url`. A missing resource is `RepoError::NotFound`.
    fn fetch(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, RepoError>;
}
