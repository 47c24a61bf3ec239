use chartbroker_release::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol view of an operation on a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn operation_state(code: StatusCode) -> OperationState {
    match code {
        StatusCode::Deleting
        | StatusCode::PendingInstall
        | StatusCode::PendingUpgrade
        | StatusCode::PendingRollback => OperationState::InProgress,
        StatusCode::Deployed | StatusCode::Deleted => OperationState::Succeeded,
        StatusCode::Unknown | StatusCode::Superseded | StatusCode::Failed => {
            OperationState::Failed
        }
    }
}
