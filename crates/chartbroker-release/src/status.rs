use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code a release manager reports for a release.
///
/// Codes arrive as upper-case strings on the wire; anything unrecognised
/// deserializes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusCode {
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
    Deleting,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl StatusCode {
    pub const ALL: [StatusCode; 9] = [
        StatusCode::Unknown,
        StatusCode::Deployed,
        StatusCode::Deleted,
        StatusCode::Superseded,
        StatusCode::Failed,
        StatusCode::Deleting,
        StatusCode::PendingInstall,
        StatusCode::PendingUpgrade,
        StatusCode::PendingRollback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::Deployed => "DEPLOYED",
            StatusCode::Deleted => "DELETED",
            StatusCode::Superseded => "SUPERSEDED",
            StatusCode::Failed => "FAILED",
            StatusCode::Deleting => "DELETING",
            StatusCode::PendingInstall => "PENDING_INSTALL",
            StatusCode::PendingUpgrade => "PENDING_UPGRADE",
            StatusCode::PendingRollback => "PENDING_ROLLBACK",
        }
    }

    pub fn parse(raw: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(raw.trim()))
            .unwrap_or(StatusCode::Unknown)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for StatusCode {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<StatusCode> for String {
    fn from(code: StatusCode) -> Self {
        code.as_str().to_owned()
    }
}
