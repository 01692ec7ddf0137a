//! Control Surface Protocol
//!
//! Endpoints and DTOs of the operator API. Operation results are the engine's outcome
//! enums wrapped in an [`OperationResponse`].

use serde::{Deserialize, Serialize};

pub const ENDPOINT_BACKUP: &str = "/backup";
pub const ENDPOINT_RESTORE: &str = "/restore";
pub const ENDPOINT_DELETE: &str = "/delete";
pub const ENDPOINT_RECLAIM: &str = "/reclaim";
pub const ENDPOINT_STATE: &str = "/state";

/// Accepted replication degrees.
pub const MIN_REPLICATION_DEGREE: u32 = 1;
pub const MAX_REPLICATION_DEGREE: u32 = 9;

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupRequest {
    pub filename: String,
    pub replication_degree: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimRequest {
    pub bytes: u64,
}

/// Either the outcome of the operation or the reason it could not run.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse<T> {
    pub outcome: Option<T>,
    pub error: Option<String>,
}

impl<T> OperationResponse<T> {
    pub fn ok(outcome: T) -> Self {
        Self {
            outcome: Some(outcome),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            outcome: None,
            error: Some(error.into()),
        }
    }
}
