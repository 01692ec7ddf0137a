use crate::network::types::PeerId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Largest payload a single chunk may carry.
pub const MAX_CHUNK_SIZE: usize = 64_000;

/// Content identifier of a backed-up file: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub String);

impl FileId {
    pub const LEN: usize = 64;

    /// Checks the textual shape of an identifier received from the wire.
    pub fn is_well_formed(text: &str) -> bool {
        text.len() == Self::LEN && text.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a chunk: the file it belongs to and its 0-based position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub file_id: FileId,
    pub index: u32,
}

impl ChunkKey {
    pub fn new(file_id: FileId, index: u32) -> Self {
        Self { file_id, index }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.file_id.0.get(..8).unwrap_or(&self.file_id.0);
        write!(f, "{}#{}", short, self.index)
    }
}

/// Replication bookkeeping of one chunk.
///
/// The current degree is always the size of the holder set; it can only move through
/// [`ChunkState::add_holder`] and [`ChunkState::remove_holder`], both idempotent, so
/// duplicated confirmations never inflate it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkState {
    desired_degree: u32,
    holders: BTreeSet<PeerId>,
}

impl ChunkState {
    pub fn new(desired_degree: u32) -> Self {
        Self {
            desired_degree,
            holders: BTreeSet::new(),
        }
    }

    pub fn desired_degree(&self) -> u32 {
        self.desired_degree
    }

    /// Records the desired degree if it was not known yet (0). Never overwrites.
    pub fn declare_desired_degree(&mut self, degree: u32) {
        if self.desired_degree == 0 {
            self.desired_degree = degree;
        }
    }

    pub fn current_degree(&self) -> usize {
        self.holders.len()
    }

    pub fn is_safe(&self) -> bool {
        self.current_degree() >= self.desired_degree as usize
    }

    /// Surplus replicas above the desired degree (0 when at or below it).
    pub fn surplus(&self) -> usize {
        self.current_degree()
            .saturating_sub(self.desired_degree as usize)
    }

    /// Returns `true` if the holder was not known before.
    pub fn add_holder(&mut self, peer: PeerId) -> bool {
        self.holders.insert(peer)
    }

    /// Returns `true` if the holder was known.
    pub fn remove_holder(&mut self, peer: &PeerId) -> bool {
        self.holders.remove(peer)
    }

    pub fn is_held_by(&self, peer: &PeerId) -> bool {
        self.holders.contains(peer)
    }

    pub fn holders(&self) -> impl Iterator<Item = &PeerId> {
        self.holders.iter()
    }
}

/// A file fragment together with its replication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub key: ChunkKey,
    pub payload: Vec<u8>,
    pub state: ChunkState,
}

impl Chunk {
    pub fn new(file_id: FileId, index: u32, payload: Vec<u8>, desired_degree: u32) -> Self {
        Self {
            key: ChunkKey::new(file_id, index),
            payload,
            state: ChunkState::new(desired_degree),
        }
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}
