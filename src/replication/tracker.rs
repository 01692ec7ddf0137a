//! Replica Tracker
//!
//! Keeps the global replication picture this peer has learned from STORED, REMOVED and
//! DELETEDCHUNK traffic, for every chunk it has heard of (stored locally or not).
//!
//! Counting is always by holder set membership. The transport delivers messages at least
//! once and in any order, so a confirmation repeated N times must still count once.

use crate::network::types::PeerId;
use crate::storage::types::{ChunkKey, ChunkState, FileId};

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Confirmations the delete initiator is still waiting for.
#[derive(Debug, Default)]
struct DeletionProgress {
    /// Chunk index -> number of distinct acknowledgements required.
    expected: BTreeMap<u32, usize>,
    acked: BTreeMap<u32, HashSet<PeerId>>,
}

impl DeletionProgress {
    fn is_confirmed(&self) -> bool {
        self.expected.iter().all(|(index, required)| {
            self.acked.get(index).map_or(0, HashSet::len) >= *required
        })
    }
}

pub struct ReplicaTracker {
    states: DashMap<ChunkKey, ChunkState>,
    /// Open suppression windows: holders seen since the window was opened.
    windows: DashMap<ChunkKey, HashSet<PeerId>>,
    deletions: DashMap<FileId, DeletionProgress>,
    /// Chunk indices this peer removed on DELETE, re-acknowledged when the DELETE repeats.
    deleted: DashMap<FileId, BTreeSet<u32>>,
}

impl ReplicaTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            states: DashMap::new(),
            windows: DashMap::new(),
            deletions: DashMap::new(),
            deleted: DashMap::new(),
        })
    }

    /// Starts counting a chunk from scratch. Used by the backup initiator before its first
    /// PUTCHUNK round.
    pub fn reset(&self, key: &ChunkKey, desired_degree: u32) {
        self.states
            .insert(key.clone(), ChunkState::new(desired_degree));
    }

    /// Records the desired degree of a chunk without touching its holders.
    pub fn declare(&self, key: &ChunkKey, desired_degree: u32) {
        self.states
            .entry(key.clone())
            .or_default()
            .declare_desired_degree(desired_degree);
    }

    /// Idempotently adds a holder and returns the new count.
    pub fn observe_holder(&self, key: &ChunkKey, peer: &PeerId) -> usize {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.insert(peer.clone());
        }

        let mut state = self.states.entry(key.clone()).or_default();
        state.add_holder(peer.clone());
        state.current_degree()
    }

    /// Idempotently removes a holder and returns the new count (0 if untracked).
    pub fn forget_holder(&self, key: &ChunkKey, peer: &PeerId) -> usize {
        match self.states.get_mut(key) {
            Some(mut state) => {
                state.remove_holder(peer);
                state.current_degree()
            }
            None => 0,
        }
    }

    /// Known holder count, or -1 if the chunk is not tracked.
    pub fn count(&self, key: &ChunkKey) -> i64 {
        self.states
            .get(key)
            .map_or(-1, |state| state.current_degree() as i64)
    }

    pub fn is_holder(&self, key: &ChunkKey, peer: &PeerId) -> bool {
        self.states
            .get(key)
            .is_some_and(|state| state.is_held_by(peer))
    }

    pub fn state(&self, key: &ChunkKey) -> Option<ChunkState> {
        self.states.get(key).map(|state| state.clone())
    }

    /// Drops every tracked chunk of a file.
    pub fn forget_file(&self, file_id: &FileId) {
        self.states.retain(|key, _| &key.file_id != file_id);
        self.windows.retain(|key, _| &key.file_id != file_id);
    }

    // --- suppression windows ---

    pub fn open_window(&self, key: &ChunkKey) {
        self.windows.insert(key.clone(), HashSet::new());
    }

    /// Closes the window and returns how many distinct holders answered while it was open.
    pub fn close_window(&self, key: &ChunkKey) -> usize {
        self.windows
            .remove(key)
            .map_or(0, |(_, seen)| seen.len())
    }

    // --- enhanced delete ---

    /// Starts waiting for DELETEDCHUNK acknowledgements: `expected` maps each chunk index
    /// to the number of distinct peers that must confirm it.
    pub fn expect_deletion(&self, file_id: &FileId, expected: BTreeMap<u32, usize>) {
        self.deletions.insert(
            file_id.clone(),
            DeletionProgress {
                expected,
                acked: BTreeMap::new(),
            },
        );
    }

    pub fn observe_deletion(&self, file_id: &FileId, index: u32, peer: &PeerId) {
        if let Some(mut progress) = self.deletions.get_mut(file_id) {
            progress.acked.entry(index).or_default().insert(peer.clone());
        }
    }

    /// True once every expected index has enough acknowledgements (or nothing is pending).
    pub fn deletion_confirmed(&self, file_id: &FileId) -> bool {
        self.deletions
            .get(file_id)
            .is_none_or(|progress| progress.is_confirmed())
    }

    pub fn is_deletion_pending(&self, file_id: &FileId) -> bool {
        self.deletions.contains_key(file_id)
    }

    pub fn finish_deletion(&self, file_id: &FileId) {
        self.deletions.remove(file_id);
    }

    /// Adds `removed` to the indices deleted locally for `file_id` and returns every index
    /// deleted so far, the ones acknowledged before included.
    pub fn record_deleted(&self, file_id: &FileId, removed: &[u32]) -> Vec<u32> {
        let mut deleted = self.deleted.entry(file_id.clone()).or_default();
        deleted.extend(removed.iter().copied());
        let indices: Vec<u32> = deleted.iter().copied().collect();
        drop(deleted);

        if indices.is_empty() {
            self.deleted.remove_if(file_id, |_, indices| indices.is_empty());
        }
        indices
    }

    /// Stops acknowledging the deletion of a chunk that is stored again.
    pub fn forget_deleted(&self, key: &ChunkKey) {
        if let Some(mut deleted) = self.deleted.get_mut(&key.file_id) {
            deleted.remove(&key.index);
        }
        self.deleted
            .remove_if(&key.file_id, |_, indices| indices.is_empty());
    }
}
