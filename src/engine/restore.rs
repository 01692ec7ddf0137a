//! File restore: GETCHUNK retries on the requester, CHUNK replies (group or direct) on
//! holders, and reassembly behind a one-shot gate per file.

use super::jitter;
use super::peer::Peer;
use super::types::RestoreOutcome;
use crate::network::types::Channel;
use crate::protocol::message::Message;
use crate::replication::pending::OperationKind;
use crate::storage::types::{ChunkKey, FileId, MAX_CHUNK_SIZE};

use anyhow::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

pub const MAX_GETCHUNK_ATTEMPTS: u32 = 5;
pub const GETCHUNK_SPACING: Duration = Duration::from_secs(1);
/// Longest a restore waits for its gate: the GETCHUNK retry window plus one second.
pub const RESTORE_TIMEOUT: Duration =
    Duration::from_secs(MAX_GETCHUNK_ATTEMPTS as u64 * GETCHUNK_SPACING.as_secs() + 1);

struct RestoreSession {
    awaited: BTreeSet<u32>,
    output: File,
    gate: Option<oneshot::Sender<()>>,
}

/// Restores in progress, one per file id. Each has its own waiting set and gate, so
/// finishing one file never releases another.
pub struct RestoreSessions {
    sessions: DashMap<FileId, Arc<Mutex<RestoreSession>>>,
}

impl RestoreSessions {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Opens `output` and starts waiting for chunks `0..chunk_count` of `file_id`. The
    /// returned receiver fires once every chunk has been written.
    pub fn begin(
        &self,
        file_id: &FileId,
        chunk_count: u32,
        output: &Path,
    ) -> Result<oneshot::Receiver<()>> {
        match self.sessions.entry(file_id.clone()) {
            Entry::Occupied(_) => Err(anyhow::anyhow!("{} is already being restored", file_id)),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let mut session = RestoreSession {
                    awaited: (0..chunk_count).collect(),
                    output: File::create(output)?,
                    gate: Some(tx),
                };
                if session.awaited.is_empty()
                    && let Some(gate) = session.gate.take()
                {
                    let _ = gate.send(());
                }
                slot.insert(Arc::new(Mutex::new(session)));
                Ok(rx)
            }
        }
    }

    pub fn is_awaiting(&self, key: &ChunkKey) -> bool {
        let Some(session) = self.session(&key.file_id) else {
            return false;
        };
        let session = session.lock().unwrap_or_else(PoisonError::into_inner);
        session.awaited.contains(&key.index)
    }

    /// Writes an awaited chunk at its offset. Returns `false` if it was not awaited
    /// (unknown file, duplicate or late delivery).
    pub fn deliver(&self, key: &ChunkKey, payload: &[u8]) -> Result<bool> {
        let Some(session) = self.session(&key.file_id) else {
            return Ok(false);
        };
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        if !session.awaited.contains(&key.index) {
            return Ok(false);
        }

        let offset = key.index as u64 * MAX_CHUNK_SIZE as u64;
        session.output.seek(SeekFrom::Start(offset))?;
        session.output.write_all(payload)?;
        session.awaited.remove(&key.index);

        if session.awaited.is_empty()
            && let Some(gate) = session.gate.take()
        {
            let _ = gate.send(());
        }
        Ok(true)
    }

    /// Ends the session and returns the indices that never arrived.
    pub fn finish(&self, file_id: &FileId) -> Vec<u32> {
        self.sessions
            .remove(file_id)
            .map(|(_, session)| {
                let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = session.output.flush() {
                    tracing::warn!("Failed to flush restore output of {}: {}", file_id, e);
                }
                session.awaited.iter().copied().collect()
            })
            .unwrap_or_default()
    }

    fn session(&self, file_id: &FileId) -> Option<Arc<Mutex<RestoreSession>>> {
        self.sessions.get(file_id).map(|session| session.clone())
    }
}

impl Default for RestoreSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Peer {
    /// Fetches every chunk of a file this peer backed up and writes it to the restore
    /// directory under its original base name.
    pub async fn restore(self: &Arc<Self>, filename: &str) -> Result<RestoreOutcome> {
        let Some(entry) = self.store.file_entry(filename) else {
            return Ok(RestoreOutcome::FileNotFound);
        };

        let restore_dir = self.config.restore_dir();
        tokio::fs::create_dir_all(&restore_dir).await?;
        let part_path = restore_dir.join(format!("{}.part", entry.file_id));
        let gate = self
            .restores
            .begin(&entry.file_id, entry.chunk_count, &part_path)?;

        tracing::info!(
            "Restoring {} ({} chunks)",
            filename,
            entry.chunk_count
        );

        let mut requests = JoinSet::new();
        for index in 0..entry.chunk_count {
            let peer = self.clone();
            let key = ChunkKey::new(entry.file_id.clone(), index);
            requests.spawn(async move { peer.request_chunk(key).await });
        }

        let released = matches!(tokio::time::timeout(RESTORE_TIMEOUT, gate).await, Ok(Ok(())));
        requests.abort_all();
        let missing = self.restores.finish(&entry.file_id);

        if !released || !missing.is_empty() {
            tracing::warn!(
                "Restore of {} incomplete: {} chunks missing",
                filename,
                missing.len()
            );
            if let Err(e) = tokio::fs::remove_file(&part_path).await {
                tracing::warn!("Failed to remove {}: {}", part_path.display(), e);
            }
            return Ok(RestoreOutcome::Incomplete { missing });
        }

        let target = restore_dir.join(restored_name(filename, &entry.file_id));
        tokio::fs::rename(&part_path, &target).await?;
        tracing::info!("Restored {} to {}", filename, target.display());

        Ok(RestoreOutcome::Completed { path: target })
    }

    /// Sends GETCHUNK for `key` up to five times, one second apart, while it is awaited.
    async fn request_chunk(&self, key: ChunkKey) {
        let callback_port = if self.config.direct_restore {
            self.transport.direct_port()
        } else {
            None
        };
        let message =
            Message::get_chunk(self.version(), self.id.clone(), &key, callback_port).encode();

        for _ in 0..MAX_GETCHUNK_ATTEMPTS {
            if !self.restores.is_awaiting(&key) {
                return;
            }
            if let Err(e) = self.transport.send(Channel::Control, &message).await {
                tracing::warn!("Failed to send GETCHUNK {}: {}", key, e);
            }
            tokio::time::sleep(GETCHUNK_SPACING).await;
        }

        if self.restores.is_awaiting(&key) {
            tracing::warn!("No holder answered for chunk {}", key);
        }
    }

    pub(crate) async fn handle_get_chunk(
        &self,
        origin: SocketAddr,
        key: ChunkKey,
        callback_port: Option<u16>,
    ) -> Result<()> {
        if !self.store.has(&key) {
            return Ok(());
        }
        // A retry of a request we are already answering.
        let Some(handle) = self.pending.register(&key, OperationKind::Restore) else {
            return Ok(());
        };

        jitter().await;
        if handle.is_cancelled() {
            tracing::debug!("Chunk {} already served by another holder", key);
            return Ok(());
        }

        let Some(chunk) = self.store.get(&key)? else {
            return Ok(());
        };
        let reply = Message::chunk(self.id.clone(), &key, chunk.payload);

        if let Some(port) = callback_port {
            let target = SocketAddr::new(origin.ip(), port);
            match self.transport.send_direct(target, &reply.encode()).await {
                Ok(()) => {
                    tracing::debug!("Sent chunk {} directly to {}", key, target);
                    self.broadcast(&Message::chunk_announcement(self.id.clone(), &key))
                        .await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Direct delivery of chunk {} to {} failed, broadcasting: {}",
                        key,
                        target,
                        e
                    );
                }
            }
        }

        self.broadcast(&reply).await;
        Ok(())
    }

    pub(crate) fn handle_chunk(&self, key: &ChunkKey, payload: Option<Vec<u8>>) -> Result<()> {
        self.pending.cancel(key, OperationKind::Restore);

        if let Some(payload) = payload
            && self.restores.deliver(key, &payload)?
        {
            tracing::debug!("Received chunk {} ({} bytes)", key, payload.len());
        }
        Ok(())
    }
}

fn restored_name(filename: &str, file_id: &FileId) -> PathBuf {
    Path::new(filename)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&file_id.0))
}
