//! Pending Operation Registry
//!
//! Tracks in-flight per-chunk jobs so that a job made redundant by network traffic can be
//! cancelled before its next send. Keys are `(chunk, kind)`; at most one job per key is
//! active at a time.
//!
//! A job owns a [`PendingHandle`] for its whole lifetime. Dropping the handle (normal
//! completion, retry exhaustion or an early return) unregisters the job. Cancellation is
//! cooperative: the job checks its [`CancelToken`] at its suspension points.

use crate::storage::types::{ChunkKey, FileId};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Backup,
    Repair,
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Backup => "backup",
            OperationKind::Repair => "repair",
            OperationKind::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared between a job and the registry.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type OperationKey = (ChunkKey, OperationKind);

struct PendingEntry {
    id: u64,
    token: CancelToken,
}

pub struct PendingOperationRegistry {
    entries: Arc<DashMap<OperationKey, PendingEntry>>,
    next_id: AtomicU64,
}

impl PendingOperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a job. Returns `None` if one is already active for the key; the caller
    /// should leave the work to it.
    pub fn register(&self, key: &ChunkKey, kind: OperationKind) -> Option<PendingHandle> {
        let op_key = (key.clone(), kind);
        match self.entries.entry(op_key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let handle = self.new_handle(op_key);
                slot.insert(PendingEntry {
                    id: handle.id,
                    token: handle.token.clone(),
                });
                Some(handle)
            }
        }
    }

    /// Registers a job, cancelling any job already active for the key.
    pub fn supersede(&self, key: &ChunkKey, kind: OperationKind) -> PendingHandle {
        let op_key = (key.clone(), kind);
        let handle = self.new_handle(op_key.clone());
        let previous = self.entries.insert(
            op_key,
            PendingEntry {
                id: handle.id,
                token: handle.token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        handle
    }

    /// Cancels and unregisters the active job for the key. Returns `true` if there was one.
    pub fn cancel(&self, key: &ChunkKey, kind: OperationKind) -> bool {
        match self.entries.remove(&(key.clone(), kind)) {
            Some((_, entry)) => {
                entry.token.cancel();
                tracing::debug!("Cancelled pending {} of chunk {}", kind, key);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: &ChunkKey, kind: OperationKind) -> bool {
        self.entries.contains_key(&(key.clone(), kind))
    }

    /// Cancels every job of every kind for a file.
    pub fn cancel_file(&self, file_id: &FileId) -> usize {
        let mut cancelled = 0;
        self.entries.retain(|(key, _), entry| {
            if &key.file_id == file_id {
                entry.token.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn new_handle(&self, key: OperationKey) -> PendingHandle {
        PendingHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            key,
            token: CancelToken::new(),
            entries: self.entries.clone(),
        }
    }
}

/// Registration of one in-flight job. Unregisters on drop.
pub struct PendingHandle {
    id: u64,
    key: OperationKey,
    token: CancelToken,
    entries: Arc<DashMap<OperationKey, PendingEntry>>,
}

impl PendingHandle {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        // A superseding job may own the slot by now.
        self.entries
            .remove_if(&self.key, |_, entry| entry.id == self.id);
    }
}
