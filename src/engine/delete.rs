//! File deletion by file id, optionally confirmed by DELETEDCHUNK acknowledgements.

use super::peer::Peer;
use super::types::DeleteOutcome;
use crate::network::types::PeerId;
use crate::protocol::message::{Message, Version};
use crate::storage::types::{ChunkKey, FileId};

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const INITIAL_DELETE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_DELETE_BACKOFF: Duration = Duration::from_secs(30);

impl Peer {
    /// Forgets a backed-up file and tells every peer to drop its chunks.
    ///
    /// On an enhanced peer the DELETE is repeated in the background until every chunk
    /// holder known at this point has acknowledged it.
    pub async fn delete(self: &Arc<Self>, filename: &str) -> Result<DeleteOutcome> {
        let Some(entry) = self.store.forget_file(filename) else {
            return Ok(DeleteOutcome::FileNotFound);
        };
        let file_id = entry.file_id;

        self.pending.cancel_file(&file_id);
        let message = Message::delete(self.version(), self.id.clone(), file_id.clone());

        if self.config.enhanced {
            let expected: BTreeMap<u32, usize> = (0..entry.chunk_count)
                .map(|index| {
                    let holders = self.replicas.count(&ChunkKey::new(file_id.clone(), index));
                    (index, holders.max(0) as usize)
                })
                .collect();
            self.replicas.expect_deletion(&file_id, expected);

            let peer = self.clone();
            let confirmed_id = file_id.clone();
            tokio::spawn(async move {
                peer.confirm_deletion(confirmed_id, message).await;
            });
        } else {
            self.broadcast(&message).await;
        }

        self.replicas.forget_file(&file_id);
        tracing::info!("Deleted {} ({})", filename, file_id);

        Ok(DeleteOutcome::Deleted { file_id })
    }

    /// Re-sends DELETE with a doubling backoff capped at 30 s until acknowledged.
    async fn confirm_deletion(&self, file_id: FileId, message: Message) {
        let mut backoff = INITIAL_DELETE_BACKOFF;
        let mut rounds = 0u32;

        loop {
            self.broadcast(&message).await;
            rounds += 1;
            tokio::time::sleep(backoff).await;

            if !self.deletion_still_wanted(&file_id) {
                tracing::info!("Stopped deleting {}: it was backed up again", file_id);
                return;
            }

            if self.replicas.deletion_confirmed(&file_id) {
                self.replicas.finish_deletion(&file_id);
                tracing::info!("Deletion of {} confirmed after {} rounds", file_id, rounds);
                return;
            }
            backoff = (backoff * 2).min(MAX_DELETE_BACKOFF);
        }
    }

    /// A new backup of the same content ends the confirmation loop of an older delete.
    fn deletion_still_wanted(&self, file_id: &FileId) -> bool {
        self.replicas.is_deletion_pending(file_id) && !self.store.owns_file(file_id)
    }

    pub(crate) async fn handle_delete(&self, version: Version, file_id: &FileId) -> Result<()> {
        let removed = self.store.remove_file(file_id)?;
        self.pending.cancel_file(file_id);
        self.replicas.forget_file(file_id);

        if !removed.is_empty() {
            tracing::info!("Removed {} chunks of deleted file {}", removed.len(), file_id);
        }

        if version == Version::Enhanced && self.config.enhanced {
            // A repeated DELETE means an earlier acknowledgement may have been lost.
            for index in self.replicas.record_deleted(file_id, &removed) {
                let key = ChunkKey::new(file_id.clone(), index);
                self.broadcast(&Message::deleted_chunk(self.version(), self.id.clone(), &key))
                    .await;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_deleted_chunk(&self, sender: &PeerId, key: &ChunkKey) {
        self.replicas.observe_deletion(&key.file_id, key.index, sender);
        self.replicas.forget_holder(key, sender);
    }
}
