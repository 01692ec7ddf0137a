//! Chunk backup: the PUTCHUNK initiator loop, the responder side and the post-store
//! self-check.

use super::jitter;
use super::peer::Peer;
use super::types::BackupOutcome;
use crate::network::types::{Channel, PeerId};
use crate::protocol::message::{Message, Version};
use crate::replication::pending::{CancelToken, OperationKind};
use crate::storage::chunker::split_file;
use crate::storage::manifest::ManifestEntry;
use crate::storage::store::SaveOutcome;
use crate::storage::types::{Chunk, ChunkKey};

use anyhow::Result;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub const MAX_PUTCHUNK_ATTEMPTS: u32 = 5;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Delay after storing a chunk before checking that it reached its desired degree.
pub const SELF_CHECK_GRACE: Duration = Duration::from_secs(10);
const SUPPRESSION_WINDOW_MS: (u64, u64) = (50, 400);

impl Peer {
    /// Splits `path` into chunks and pushes each of them until `desired_degree` distinct
    /// peers confirm it or the retries run out.
    pub async fn backup(self: &Arc<Self>, path: &Path, desired_degree: u32) -> Result<BackupOutcome> {
        let filename = path.to_string_lossy().into_owned();
        if self.store.file_entry(&filename).is_some() {
            return Ok(BackupOutcome::AlreadyExists);
        }

        let source = path.to_path_buf();
        let split = match tokio::task::spawn_blocking(move || split_file(source)).await? {
            Ok(split) => split,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BackupOutcome::FileNotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let chunk_count = split.chunks.len() as u32;

        let registered = self.store.register_file(
            &filename,
            ManifestEntry {
                file_id: split.file_id.clone(),
                chunk_count,
                desired_degree,
            },
        );
        if !registered {
            return Ok(BackupOutcome::AlreadyExists);
        }
        // An older delete of the same content must not keep wiping the new replicas.
        self.replicas.finish_deletion(&split.file_id);

        tracing::info!(
            "Backing up {} as {} ({} chunks, degree {})",
            filename,
            split.file_id,
            chunk_count,
            desired_degree
        );

        let mut pushes = JoinSet::new();
        for (index, payload) in split.chunks.into_iter().enumerate() {
            let peer = self.clone();
            let chunk = Chunk::new(split.file_id.clone(), index as u32, payload, desired_degree);
            pushes.spawn(async move {
                let handle = peer.pending.supersede(&chunk.key, OperationKind::Backup);
                let reached = peer.backup_chunk(&chunk, Some(handle.token())).await;
                (chunk.key.index, reached)
            });
        }

        let mut under_replicated = Vec::new();
        while let Some(joined) = pushes.join_next().await {
            let (index, reached) = joined?;
            match reached {
                Ok(true) => {}
                Ok(false) => under_replicated.push(index),
                Err(e) => {
                    tracing::error!("Backup of chunk {} failed: {}", index, e);
                    under_replicated.push(index);
                }
            }
        }
        under_replicated.sort_unstable();

        if under_replicated.is_empty() {
            tracing::info!("Backup of {} completed", filename);
        } else {
            tracing::warn!(
                "Backup of {} completed with {} under-replicated chunks",
                filename,
                under_replicated.len()
            );
        }

        Ok(BackupOutcome::Completed {
            file_id: split.file_id,
            chunks: chunk_count,
            under_replicated,
        })
    }

    /// Broadcasts PUTCHUNK for `chunk` until its desired degree is confirmed, backing off
    /// 1 s, 2 s, 4 s... between rounds. Returns whether the degree was reached.
    ///
    /// Stops early, without sending again, once `cancel` is set.
    pub async fn backup_chunk(&self, chunk: &Chunk, cancel: Option<&CancelToken>) -> Result<bool> {
        let _permit = self.backup_permits.acquire().await?;

        let key = &chunk.key;
        let desired = chunk.state.desired_degree();
        self.replicas.reset(key, desired);

        let message = Message::put_chunk(
            self.version(),
            self.id.clone(),
            key,
            desired,
            chunk.payload.clone(),
        )
        .encode();

        let is_cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_PUTCHUNK_ATTEMPTS {
            if is_cancelled() {
                tracing::debug!("Push of chunk {} cancelled", key);
                return Ok(false);
            }

            if let Err(e) = self.transport.send(Channel::Push, &message).await {
                tracing::warn!("Failed to send PUTCHUNK {}: {}", key, e);
            }
            tokio::time::sleep(backoff).await;

            let confirmed = self.confirmed_degree(key);
            if confirmed >= desired as usize {
                tracing::debug!(
                    "Chunk {} reached degree {}/{} after {} attempts",
                    key,
                    confirmed,
                    desired,
                    attempt
                );
                return Ok(true);
            }

            tracing::debug!(
                "Chunk {}: {}/{} confirmations after attempt {}",
                key,
                confirmed,
                desired,
                attempt
            );
            backoff *= 2;
        }

        tracing::warn!(
            "Giving up on chunk {} after {} attempts ({}/{} replicas)",
            key,
            MAX_PUTCHUNK_ATTEMPTS,
            self.confirmed_degree(key),
            desired
        );
        Ok(false)
    }

    /// Distinct confirmed holders, counting this peer if it stores the chunk itself.
    fn confirmed_degree(&self, key: &ChunkKey) -> usize {
        let remote = self.replicas.count(key).max(0) as usize;
        if self.store.has(key) && !self.replicas.is_holder(key, &self.id) {
            remote + 1
        } else {
            remote
        }
    }

    pub(crate) async fn handle_put_chunk(
        self: &Arc<Self>,
        version: Version,
        key: ChunkKey,
        desired_degree: u32,
        payload: Vec<u8>,
    ) -> Result<()> {
        if self.store.owns_file(&key.file_id) {
            tracing::debug!("Ignoring PUTCHUNK {} for one of our own files", key);
            return Ok(());
        }

        self.replicas.declare(&key, desired_degree);

        if self.pending.cancel(&key, OperationKind::Repair) {
            tracing::info!("Another peer is pushing chunk {}, dropped our repair", key);
        }

        if self.store.has(&key) {
            jitter().await;
            self.broadcast(&Message::stored(self.version(), self.id.clone(), &key))
                .await;
            return Ok(());
        }

        if self.store.is_relinquished(&key) {
            tracing::debug!("Ignoring PUTCHUNK {}: given up in a reclaim", key);
            return Ok(());
        }

        let suppress = version == Version::Enhanced && self.config.enhanced;
        if suppress {
            self.replicas.open_window(&key);
            let wait = rand::thread_rng().gen_range(SUPPRESSION_WINDOW_MS.0..=SUPPRESSION_WINDOW_MS.1);
            tokio::time::sleep(Duration::from_millis(wait)).await;

            let answered = self.replicas.close_window(&key);
            if answered >= desired_degree as usize {
                tracing::debug!(
                    "Not storing chunk {}: {} peers already answered",
                    key,
                    answered
                );
                return Ok(());
            }
        }

        let mut chunk = Chunk::new(key.file_id.clone(), key.index, payload, desired_degree);
        if let Some(known) = self.replicas.state(&key) {
            for holder in known.holders() {
                chunk.state.add_holder(holder.clone());
            }
        }

        match self.store.save(&chunk)? {
            SaveOutcome::Stored => {
                self.replicas.observe_holder(&key, &self.id);
                self.replicas.forget_deleted(&key);
                tracing::debug!("Stored chunk {} ({} bytes)", key, chunk.size());

                if !suppress {
                    jitter().await;
                }
                self.broadcast(&Message::stored(self.version(), self.id.clone(), &key))
                    .await;
                self.schedule_self_check(key);
            }
            SaveOutcome::AlreadyStored => {
                jitter().await;
                self.broadcast(&Message::stored(self.version(), self.id.clone(), &key))
                    .await;
            }
            SaveOutcome::InsufficientSpace => {
                tracing::debug!("No room for chunk {}, not answering", key);
            }
            SaveOutcome::Relinquished => {
                tracing::debug!("Chunk {} was reclaimed here, not taking it back", key);
            }
        }

        Ok(())
    }

    pub(crate) fn handle_stored(&self, sender: &PeerId, key: &ChunkKey) {
        let count = self.replicas.observe_holder(key, sender);
        self.store.observe_holder(key, sender);
        tracing::debug!("{} stores chunk {} ({} known holders)", sender, key, count);
    }

    fn schedule_self_check(self: &Arc<Self>, key: ChunkKey) {
        let peer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SELF_CHECK_GRACE).await;
            if let Err(e) = peer.self_check(&key).await {
                tracing::warn!("Self-check of chunk {} failed: {}", key, e);
            }
        });
    }

    /// Re-pushes a stored chunk that is still below its desired degree.
    async fn self_check(&self, key: &ChunkKey) -> Result<()> {
        let Some(state) = self.store.state(key) else {
            return Ok(());
        };
        if state.is_safe() {
            return Ok(());
        }

        let Some(handle) = self.pending.register(key, OperationKind::Repair) else {
            return Ok(());
        };
        let Some(chunk) = self.store.get(key)? else {
            return Ok(());
        };

        tracing::info!(
            "Chunk {} has {}/{} replicas after the grace period, pushing it again",
            key,
            state.current_degree(),
            state.desired_degree()
        );
        self.backup_chunk(&chunk, Some(handle.token())).await?;
        Ok(())
    }
}
