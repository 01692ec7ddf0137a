//! Local Chunk Store
//!
//! Persists chunk payloads on disk and keeps, behind a single lock, everything that has to
//! stay consistent with them: the chunk index with per-chunk replication state, the
//! capacity ledger and the backup manifest.
//!
//! ## Invariants
//! - `used_bytes` equals the sum of the sizes of indexed chunks.
//! - `used_bytes <= capacity_bytes` after every operation.
//! - Replication counts used for eviction or repair decisions are read under the same lock
//!   as the mutation they inform.
//! - A chunk evicted by a reclaim is not stored again until its file is deleted.
//!
//! The snapshot (`<peer>.disk`) is rewritten after every mutation. It is not transactional
//! with the payload files: a crash in between leaves orphans that [`ChunkStore::open`]
//! cleans up.

use super::manifest::{FileManifest, ManifestEntry};
use super::types::{Chunk, ChunkKey, ChunkState, FileId};
use crate::network::types::PeerId;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("capacity ledger underflow: {used} bytes used, removing {size} bytes")]
    LedgerUnderflow { used: u64, size: u64 },
}

/// Result of trying to keep a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    AlreadyStored,
    InsufficientSpace,
    /// This peer gave the chunk up in a reclaim and does not take it back.
    Relinquished,
}

/// Which chunks an eviction pass may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Only chunks replicated above their desired degree that fit in what is left of
    /// the reclaim target.
    Surplus,
    /// Any chunk; losing it may leave the network under-replicated.
    Any,
}

/// A chunk removed by an eviction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub key: ChunkKey,
    pub size: u64,
    pub state: ChunkState,
}

/// Summary of one locally stored replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSummary {
    pub key: ChunkKey,
    pub size: u64,
    pub state: ChunkState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    size: u64,
    state: ChunkState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Disk {
    capacity_bytes: u64,
    used_bytes: u64,
    manifest: FileManifest,
    chunks: BTreeMap<FileId, BTreeMap<u32, StoredChunk>>,
    /// Chunks evicted by a reclaim. Cleared when their file is deleted.
    relinquished: BTreeSet<ChunkKey>,
}

impl Disk {
    fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            ..Self::default()
        }
    }

    fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    fn entry(&self, key: &ChunkKey) -> Option<&StoredChunk> {
        self.chunks.get(&key.file_id)?.get(&key.index)
    }

    fn entry_mut(&mut self, key: &ChunkKey) -> Option<&mut StoredChunk> {
        self.chunks.get_mut(&key.file_id)?.get_mut(&key.index)
    }
}

pub struct ChunkStore {
    local_id: PeerId,
    chunk_dir: PathBuf,
    snapshot_path: PathBuf,
    disk: Mutex<Disk>,
}

impl ChunkStore {
    /// Opens the store rooted at `root`, loading `<root>/<peer>.disk` if it exists or
    /// starting an empty disk of `capacity_bytes` otherwise.
    pub fn open(
        root: impl AsRef<Path>,
        local_id: PeerId,
        capacity_bytes: u64,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let chunk_dir = root.join("chunks");
        fs::create_dir_all(&chunk_dir)?;
        let snapshot_path = root.join(format!("{}.disk", local_id.0));

        let disk = if snapshot_path.is_file() {
            let disk: Disk = bincode::deserialize(&fs::read(&snapshot_path)?)?;
            tracing::info!(
                "Loaded disk: {} files backed up, {} of {} bytes used",
                disk.manifest.len(),
                disk.used_bytes,
                disk.capacity_bytes
            );
            disk
        } else {
            tracing::info!("Starting an empty disk of {} bytes", capacity_bytes);
            Disk::with_capacity(capacity_bytes)
        };

        let store = Self {
            local_id,
            chunk_dir,
            snapshot_path,
            disk: Mutex::new(disk),
        };

        {
            let mut disk = store.disk();
            store.reconcile(&mut disk)?;
            store.persist(&disk);
        }

        Ok(store)
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    fn disk(&self) -> MutexGuard<'_, Disk> {
        self.disk.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_dir(&self, file_id: &FileId) -> PathBuf {
        self.chunk_dir.join(&file_id.0)
    }

    fn chunk_path(&self, key: &ChunkKey) -> PathBuf {
        self.file_dir(&key.file_id).join(key.index.to_string())
    }

    fn persist(&self, disk: &Disk) {
        let result = bincode::serialize(disk)
            .map_err(StoreError::from)
            .and_then(|bytes| {
                let tmp = self.snapshot_path.with_extension("disk.tmp");
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, &self.snapshot_path)?;
                Ok(())
            });

        if let Err(e) = result {
            tracing::error!("Failed to save the disk snapshot: {}", e);
        }
    }

    /// Brings the index and the payload directory back in line after a crash.
    fn reconcile(&self, disk: &mut Disk) -> Result<(), StoreError> {
        for file_entry in fs::read_dir(&self.chunk_dir)? {
            let file_entry = file_entry?;
            let file_id = FileId(file_entry.file_name().to_string_lossy().into_owned());
            let Some(indexed) = disk.chunks.get(&file_id) else {
                tracing::warn!("Removing orphaned chunk directory {}", file_id);
                fs::remove_dir_all(file_entry.path())?;
                continue;
            };

            for chunk_entry in fs::read_dir(file_entry.path())? {
                let chunk_entry = chunk_entry?;
                let index = chunk_entry.file_name().to_string_lossy().parse::<u32>().ok();
                if !index.is_some_and(|index| indexed.contains_key(&index)) {
                    tracing::warn!(
                        "Removing orphaned chunk file {}",
                        chunk_entry.path().display()
                    );
                    fs::remove_file(chunk_entry.path())?;
                }
            }
        }

        let mut missing = Vec::new();
        for (file_id, chunks) in &disk.chunks {
            for index in chunks.keys() {
                let key = ChunkKey::new(file_id.clone(), *index);
                if !self.chunk_path(&key).is_file() {
                    missing.push(key);
                }
            }
        }
        for key in missing {
            tracing::warn!("Dropping index entry for missing chunk {}", key);
            if let Some(chunks) = disk.chunks.get_mut(&key.file_id) {
                chunks.remove(&key.index);
                if chunks.is_empty() {
                    disk.chunks.remove(&key.file_id);
                }
            }
        }

        disk.used_bytes = disk
            .chunks
            .values()
            .flat_map(|chunks| chunks.values())
            .map(|chunk| chunk.size)
            .sum();

        Ok(())
    }

    // --- chunk operations ---

    /// Keeps a replica of `chunk`. The local peer is added to the stored holder set.
    ///
    /// Saving a chunk that is already indexed changes nothing.
    pub fn save(&self, chunk: &Chunk) -> Result<SaveOutcome, StoreError> {
        let mut disk = self.disk();

        if disk.entry(&chunk.key).is_some() {
            return Ok(SaveOutcome::AlreadyStored);
        }
        if disk.relinquished.contains(&chunk.key) {
            return Ok(SaveOutcome::Relinquished);
        }

        let size = chunk.size();
        if size > disk.free_bytes() {
            tracing::debug!(
                "Not enough space for chunk {} ({} bytes, {} free)",
                chunk.key,
                size,
                disk.free_bytes()
            );
            return Ok(SaveOutcome::InsufficientSpace);
        }

        let path = self.chunk_path(&chunk.key);
        fs::create_dir_all(self.file_dir(&chunk.key.file_id))?;
        fs::write(&path, &chunk.payload)?;

        let mut state = chunk.state.clone();
        state.add_holder(self.local_id.clone());
        disk.chunks
            .entry(chunk.key.file_id.clone())
            .or_default()
            .insert(chunk.key.index, StoredChunk { size, state });
        disk.used_bytes += size;

        self.persist(&disk);
        Ok(SaveOutcome::Stored)
    }

    pub fn get(&self, key: &ChunkKey) -> Result<Option<Chunk>, StoreError> {
        let disk = self.disk();
        let Some(stored) = disk.entry(key) else {
            return Ok(None);
        };

        let payload = fs::read(self.chunk_path(key))?;
        Ok(Some(Chunk {
            key: key.clone(),
            payload,
            state: stored.state.clone(),
        }))
    }

    pub fn has(&self, key: &ChunkKey) -> bool {
        self.disk().entry(key).is_some()
    }

    pub fn is_relinquished(&self, key: &ChunkKey) -> bool {
        self.disk().relinquished.contains(key)
    }

    /// Deletes a replica. Returns `false` if it was not stored.
    pub fn remove(&self, key: &ChunkKey) -> Result<bool, StoreError> {
        let mut disk = self.disk();
        let removed = self.remove_locked(&mut disk, key)?;
        if removed.is_some() {
            self.persist(&disk);
        }
        Ok(removed.is_some())
    }

    fn remove_locked(
        &self,
        disk: &mut Disk,
        key: &ChunkKey,
    ) -> Result<Option<StoredChunk>, StoreError> {
        let Some(size) = disk.entry(key).map(|stored| stored.size) else {
            return Ok(None);
        };

        debug_assert!(size <= disk.used_bytes, "capacity ledger underflow");
        if size > disk.used_bytes {
            tracing::error!(
                "Ledger underflow removing {}: {} bytes used, {} bytes indexed",
                key,
                disk.used_bytes,
                size
            );
            return Err(StoreError::LedgerUnderflow {
                used: disk.used_bytes,
                size,
            });
        }

        match fs::remove_file(self.chunk_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Payload of chunk {} was already gone", key);
            }
            Err(e) => return Err(e.into()),
        }

        let mut removed = None;
        let mut file_emptied = false;
        if let Some(chunks) = disk.chunks.get_mut(&key.file_id) {
            removed = chunks.remove(&key.index);
            file_emptied = chunks.is_empty();
        }
        if file_emptied {
            disk.chunks.remove(&key.file_id);
            match fs::remove_dir_all(self.file_dir(&key.file_id)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        disk.used_bytes -= size;

        Ok(removed)
    }

    /// Deletes every local replica of `file_id` and returns the removed indices. Also
    /// forgets which of its chunks were relinquished.
    pub fn remove_file(&self, file_id: &FileId) -> Result<Vec<u32>, StoreError> {
        let mut disk = self.disk();
        let before = disk.relinquished.len();
        disk.relinquished.retain(|key| &key.file_id != file_id);
        let forgot_relinquished = disk.relinquished.len() != before;

        let indices: Vec<u32> = disk
            .chunks
            .get(file_id)
            .map(|chunks| chunks.keys().copied().collect())
            .unwrap_or_default();

        let mut removed = Vec::new();
        for index in indices {
            let key = ChunkKey::new(file_id.clone(), index);
            if self.remove_locked(&mut disk, &key)?.is_some() {
                removed.push(index);
            }
        }

        if !removed.is_empty() || forgot_relinquished {
            self.persist(&disk);
        }
        Ok(removed)
    }

    /// Persists the replication state carried by `chunk` without touching its payload.
    /// Returns `false` if the chunk is not stored.
    pub fn update_state(&self, chunk: &Chunk) -> bool {
        let mut disk = self.disk();
        let Some(stored) = disk.entry_mut(&chunk.key) else {
            return false;
        };
        stored.state = chunk.state.clone();
        self.persist(&disk);
        true
    }

    pub fn state(&self, key: &ChunkKey) -> Option<ChunkState> {
        self.disk().entry(key).map(|stored| stored.state.clone())
    }

    /// Records `peer` as a holder of a locally stored chunk and returns the new state,
    /// or `None` if the chunk is not stored here.
    pub fn observe_holder(&self, key: &ChunkKey, peer: &PeerId) -> Option<ChunkState> {
        let mut disk = self.disk();
        let stored = disk.entry_mut(key)?;
        let changed = stored.state.add_holder(peer.clone());
        let state = stored.state.clone();
        if changed {
            self.persist(&disk);
        }
        Some(state)
    }

    /// Drops `peer` from the holders of a locally stored chunk and returns the new state,
    /// or `None` if the chunk is not stored here.
    pub fn forget_holder(&self, key: &ChunkKey, peer: &PeerId) -> Option<ChunkState> {
        let mut disk = self.disk();
        let stored = disk.entry_mut(key)?;
        let changed = stored.state.remove_holder(peer);
        let state = stored.state.clone();
        if changed {
            self.persist(&disk);
        }
        Some(state)
    }

    /// Evicts one chunk chosen by `policy` and withdraws its size from the capacity. The
    /// chunk is remembered as relinquished so a later repair push does not refill it.
    ///
    /// Surplus only considers chunks of at most `remaining` bytes and picks the largest
    /// surplus first; Any picks the chunk with the most known holders first. Ties go to
    /// the larger chunk. Zero-length chunks are never picked.
    pub fn reclaim_one(
        &self,
        policy: EvictionPolicy,
        remaining: u64,
    ) -> Result<Option<Evicted>, StoreError> {
        let mut disk = self.disk();

        let candidate = disk
            .chunks
            .iter()
            .flat_map(|(file_id, chunks)| {
                chunks
                    .iter()
                    .map(move |(index, stored)| (file_id, *index, stored))
            })
            .filter(|(_, _, stored)| stored.size > 0)
            .filter(|(_, _, stored)| match policy {
                EvictionPolicy::Surplus => stored.state.surplus() > 0 && stored.size <= remaining,
                EvictionPolicy::Any => true,
            })
            .max_by_key(|(_, _, stored)| {
                let rank = match policy {
                    EvictionPolicy::Surplus => stored.state.surplus(),
                    EvictionPolicy::Any => stored.state.current_degree(),
                };
                (rank, stored.size)
            })
            .map(|(file_id, index, _)| ChunkKey::new(file_id.clone(), index));

        let Some(key) = candidate else {
            return Ok(None);
        };
        let Some(stored) = self.remove_locked(&mut disk, &key)? else {
            return Ok(None);
        };
        disk.capacity_bytes = disk.capacity_bytes.saturating_sub(stored.size);
        disk.relinquished.insert(key.clone());
        self.persist(&disk);

        Ok(Some(Evicted {
            key,
            size: stored.size,
            state: stored.state,
        }))
    }

    pub fn stored_chunks(&self) -> Vec<StoredSummary> {
        let disk = self.disk();
        disk.chunks
            .iter()
            .flat_map(|(file_id, chunks)| {
                chunks.iter().map(move |(index, stored)| StoredSummary {
                    key: ChunkKey::new(file_id.clone(), *index),
                    size: stored.size,
                    state: stored.state.clone(),
                })
            })
            .collect()
    }

    // --- capacity ledger ---

    pub fn capacity_bytes(&self) -> u64 {
        self.disk().capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.disk().used_bytes
    }

    pub fn free_bytes(&self) -> u64 {
        self.disk().free_bytes()
    }

    // --- manifest ---

    /// Records a file this peer is backing up. Returns `false` if the name is taken.
    pub fn register_file(&self, filename: &str, entry: ManifestEntry) -> bool {
        let mut disk = self.disk();
        let inserted = disk.manifest.insert(filename, entry);
        if inserted {
            self.persist(&disk);
        }
        inserted
    }

    pub fn file_entry(&self, filename: &str) -> Option<ManifestEntry> {
        self.disk().manifest.get(filename).cloned()
    }

    pub fn forget_file(&self, filename: &str) -> Option<ManifestEntry> {
        let mut disk = self.disk();
        let removed = disk.manifest.remove(filename);
        if removed.is_some() {
            self.persist(&disk);
        }
        removed
    }

    /// Whether `file_id` is one of this peer's own backed-up files.
    pub fn owns_file(&self, file_id: &FileId) -> bool {
        self.disk().manifest.contains_file_id(file_id)
    }

    pub fn backed_up_files(&self) -> Vec<(String, ManifestEntry)> {
        self.disk()
            .manifest
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }
}
