//! Lifecycle core of chartbroker.
//!
//! Maps the service broker protocol onto chart packages. Catalog entries are
//! derived from the merged repository index, service ids decode back to
//! package references, provisioned instances live in an [`InstanceRegistry`],
//! and every lifecycle call is forwarded to a release manager keyed by a
//! release name derived from the instance id. [`Broker`] ties it together.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod identity;
pub mod registry;
pub mod state;

pub use broker::{
    BindResponse, Broker, BrokerSettings, DeprovisionRequest, DeprovisionResponse,
    LastOperationResponse, ProvisionRequest, ProvisionResponse, UpdateRequest, UpdateResponse,
};
pub use catalog::{build_catalog, catalog_from_index, CatalogEntry, Plan};
pub use config::BrokerConfig;
pub use identity::{
    decode_package_reference, encode_service_id, encode_service_name, release_name_for,
    IdStrategy,
};
pub use registry::{InstanceRegistry, PutOutcome, ServiceInstance};
pub use state::{operation_state, OperationState};

use chartbroker_release::ReleaseError;
use chartbroker_repo::RepoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("instance {0} already exists with different attributes")]
    Conflict(String),
    #[error("instance {0} is still being provisioned")]
    InProgress(String),
    #[error("namespace is required to provision instance {0}")]
    MissingNamespace(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("repository error: {0}")]
    Repo(RepoError),
    #[error("{0}")]
    Upstream(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Short error kind reported to protocol clients.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::InvalidFormat(_) => "InvalidFormat",
            BrokerError::NotFound(_) => "NotFound",
            BrokerError::Conflict(_) => "Conflict",
            BrokerError::InProgress(_) => "ConcurrencyError",
            BrokerError::MissingNamespace(_) => "MissingNamespace",
            BrokerError::VerificationFailed(_) => "VerificationFailed",
            BrokerError::DownloadFailed(_) => "DownloadFailed",
            BrokerError::Repo(_) => "RepositoryError",
            BrokerError::Upstream(_) => "UpstreamError",
            BrokerError::Config(_) => "ConfigError",
            BrokerError::Io(_) => "IoError",
            BrokerError::Serialization(_) => "SerializationError",
        }
    }
}

impl From<RepoError> for BrokerError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound(msg) => BrokerError::NotFound(msg),
            RepoError::VerificationFailed(msg) => BrokerError::VerificationFailed(msg),
            RepoError::DownloadFailed(msg) => BrokerError::DownloadFailed(msg),
            other => BrokerError::Repo(other),
        }
    }
}

impl From<ReleaseError> for BrokerError {
    fn from(e: ReleaseError) -> Self {
        match e {
            ReleaseError::NotFound(name) => BrokerError::NotFound(format!("release {name}")),
            other => BrokerError::Upstream(other.to_string()),
        }
    }
}
