//! Peer context and message dispatch.

use super::restore::RestoreSessions;
use super::types::{BackedUpFile, PeerReport, StoredChunkReport};
use crate::config::PeerConfig;
use crate::network::transport::Transport;
use crate::network::types::{Channel, Envelope, PeerId};
use crate::protocol::message::{Body, Message, Version};
use crate::replication::pending::PendingOperationRegistry;
use crate::replication::tracker::ReplicaTracker;
use crate::storage::store::ChunkStore;
use crate::storage::types::ChunkKey;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// Everything one peer owns. Passed explicitly to every flow; there is no process-wide
/// instance.
pub struct Peer {
    pub(crate) id: PeerId,
    pub(crate) config: PeerConfig,
    pub(crate) store: Arc<ChunkStore>,
    pub(crate) replicas: Arc<ReplicaTracker>,
    pub(crate) pending: Arc<PendingOperationRegistry>,
    pub(crate) restores: RestoreSessions,
    pub(crate) transport: Arc<dyn Transport>,
    /// Bounds simultaneous chunk-backup pushes.
    pub(crate) backup_permits: Semaphore,
}

impl Peer {
    /// Opens the peer's store under `config.data_dir` and wires it to `transport`.
    pub fn open(config: PeerConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let store = ChunkStore::open(
            &config.data_dir,
            config.peer_id.clone(),
            config.capacity_bytes,
        )?;

        Ok(Arc::new(Self {
            id: config.peer_id.clone(),
            store: Arc::new(store),
            replicas: ReplicaTracker::new(),
            pending: PendingOperationRegistry::new(),
            restores: RestoreSessions::new(),
            transport,
            backup_permits: Semaphore::new(config.max_concurrent_backups),
            config,
        }))
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn replicas(&self) -> &Arc<ReplicaTracker> {
        &self.replicas
    }

    pub fn pending(&self) -> &Arc<PendingOperationRegistry> {
        &self.pending
    }

    /// Protocol version this peer speaks.
    pub fn version(&self) -> Version {
        if self.config.enhanced {
            Version::Enhanced
        } else {
            Version::Base
        }
    }

    /// Starts the receive loop over `inbound`. Each message is handled on its own task so
    /// a slow handler never holds up reception.
    pub fn start(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let peer = self.clone();
        tracing::info!(
            "Peer {} started (protocol {}, {} bytes capacity)",
            peer.id,
            peer.version(),
            peer.store.capacity_bytes()
        );

        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                let peer = peer.clone();
                tokio::spawn(async move {
                    peer.dispatch(envelope).await;
                });
            }
            tracing::info!("Inbound queue closed, peer {} stopped receiving", peer.id);
        })
    }

    pub(crate) async fn dispatch(self: Arc<Self>, envelope: Envelope) {
        let message = match Message::decode(&envelope.bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Dropping malformed message from {}: {}", envelope.sender, e);
                return;
            }
        };

        if message.sender == self.id {
            return;
        }

        let expected = message.body.channel();
        let direct_chunk =
            envelope.channel == Channel::Direct && matches!(message.body, Body::Chunk { .. });
        if envelope.channel != expected && !direct_chunk {
            tracing::debug!(
                "Dropping {} received on the {} channel",
                message,
                envelope.channel
            );
            return;
        }

        tracing::debug!("Received {}", message);
        let summary = message.to_string();

        let Message {
            version,
            sender,
            file_id,
            body,
        } = message;

        let result = match body {
            Body::PutChunk {
                index,
                desired_degree,
                payload,
            } => {
                self.handle_put_chunk(
                    version,
                    ChunkKey::new(file_id, index),
                    desired_degree,
                    payload,
                )
                .await
            }
            Body::Stored { index } => {
                self.handle_stored(&sender, &ChunkKey::new(file_id, index));
                Ok(())
            }
            Body::GetChunk {
                index,
                callback_port,
            } => {
                self.handle_get_chunk(
                    envelope.sender,
                    ChunkKey::new(file_id, index),
                    callback_port,
                )
                .await
            }
            Body::Chunk { index, payload } => {
                self.handle_chunk(&ChunkKey::new(file_id, index), payload)
            }
            Body::Delete => self.handle_delete(version, &file_id).await,
            Body::Removed { index } => {
                self.handle_removed(&sender, ChunkKey::new(file_id, index));
                Ok(())
            }
            Body::DeletedChunk { index } => {
                self.handle_deleted_chunk(&sender, &ChunkKey::new(file_id, index));
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!("Failed to handle {}: {}", summary, e);
        }
    }

    /// Sends `message` on its group channel. Send failures count as message loss.
    pub(crate) async fn broadcast(&self, message: &Message) {
        let channel = message.body.channel();
        if let Err(e) = self.transport.send(channel, &message.encode()).await {
            tracing::warn!("Failed to send {} on {}: {}", message, channel, e);
        }
    }

    pub fn report(&self) -> PeerReport {
        let files = self
            .store
            .backed_up_files()
            .into_iter()
            .map(|(filename, entry)| BackedUpFile {
                chunk_degrees: (0..entry.chunk_count)
                    .map(|index| {
                        self.replicas
                            .count(&ChunkKey::new(entry.file_id.clone(), index))
                    })
                    .collect(),
                filename,
                file_id: entry.file_id,
                desired_degree: entry.desired_degree,
            })
            .collect();

        let chunks = self
            .store
            .stored_chunks()
            .into_iter()
            .map(|stored| StoredChunkReport {
                file_id: stored.key.file_id,
                index: stored.key.index,
                size: stored.size,
                desired_degree: stored.state.desired_degree(),
                current_degree: stored.state.current_degree(),
            })
            .collect();

        PeerReport {
            peer_id: self.id.clone(),
            capacity_bytes: self.store.capacity_bytes(),
            used_bytes: self.store.used_bytes(),
            files,
            chunks,
        }
    }
}
