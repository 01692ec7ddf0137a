use crate::network::types::PeerId;
use crate::storage::types::FileId;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of backing up a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackupOutcome {
    /// Every chunk was pushed. `under_replicated` lists the chunks that did not reach the
    /// desired degree before the retries ran out.
    Completed {
        file_id: FileId,
        chunks: u32,
        under_replicated: Vec<u32>,
    },
    AlreadyExists,
    FileNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Completed { path: PathBuf },
    /// No holder answered for these chunk indices in time.
    Incomplete { missing: Vec<u32> },
    FileNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { file_id: FileId },
    FileNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReclaimOutcome {
    /// Eviction is running in the background.
    Started { target_bytes: u64 },
    ExceedsUsage { target_bytes: u64, used_bytes: u64 },
}

/// Snapshot of a peer's state for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReport {
    pub peer_id: PeerId,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub files: Vec<BackedUpFile>,
    pub chunks: Vec<StoredChunkReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub filename: String,
    pub file_id: FileId,
    pub desired_degree: u32,
    /// Known replication count per chunk index, -1 when nothing was heard about it.
    pub chunk_degrees: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunkReport {
    pub file_id: FileId,
    pub index: u32,
    pub size: u64,
    pub desired_degree: u32,
    pub current_degree: usize,
}
