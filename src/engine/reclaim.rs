//! Space reclaiming and the repair it can trigger on other holders.

use super::jitter;
use super::peer::Peer;
use super::types::ReclaimOutcome;
use crate::network::types::PeerId;
use crate::protocol::message::Message;
use crate::replication::pending::OperationKind;
use crate::storage::store::EvictionPolicy;
use crate::storage::types::ChunkKey;

use std::sync::Arc;

impl Peer {
    /// Starts evicting chunks in the background until `target_bytes` are freed. Each
    /// evicted chunk lowers the capacity by its size, is announced with REMOVED and is
    /// declined if another holder's repair pushes it back.
    ///
    /// The surplus pass never frees more than the target; only the degraded pass may
    /// overshoot, by at most its last chunk.
    pub fn reclaim(self: &Arc<Self>, target_bytes: u64) -> ReclaimOutcome {
        let used_bytes = self.store.used_bytes();
        if target_bytes > used_bytes {
            return ReclaimOutcome::ExceedsUsage {
                target_bytes,
                used_bytes,
            };
        }

        let peer = self.clone();
        tokio::spawn(async move {
            peer.run_reclaim(target_bytes).await;
        });

        ReclaimOutcome::Started { target_bytes }
    }

    async fn run_reclaim(&self, target_bytes: u64) {
        let mut freed = 0u64;
        let mut degraded = 0usize;

        for policy in [EvictionPolicy::Surplus, EvictionPolicy::Any] {
            while freed < target_bytes {
                let evicted = match self.store.reclaim_one(policy, target_bytes - freed) {
                    Ok(Some(evicted)) => evicted,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Reclaim stopped: {}", e);
                        return;
                    }
                };

                freed += evicted.size;
                if policy == EvictionPolicy::Any {
                    degraded += 1;
                }
                self.replicas.forget_holder(&evicted.key, &self.id);
                self.pending.cancel(&evicted.key, OperationKind::Repair);

                tracing::debug!("Evicted chunk {} ({} bytes)", evicted.key, evicted.size);
                self.broadcast(&Message::removed(self.version(), self.id.clone(), &evicted.key))
                    .await;
            }
        }

        if degraded > 0 {
            tracing::warn!(
                "Reclaim evicted {} chunks that may now be under-replicated",
                degraded
            );
        }
        tracing::info!(
            "Reclaim finished: freed {} of {} bytes, capacity now {} bytes",
            freed,
            target_bytes,
            self.store.capacity_bytes()
        );
    }

    /// A holder dropped its replica. If ours is now below the desired degree, schedule a
    /// repair push that another repairer's PUTCHUNK can still cancel.
    pub(crate) fn handle_removed(self: &Arc<Self>, sender: &PeerId, key: ChunkKey) {
        self.replicas.forget_holder(&key, sender);

        let Some(state) = self.store.forget_holder(&key, sender) else {
            return;
        };
        if state.is_safe() {
            return;
        }
        let Some(handle) = self.pending.register(&key, OperationKind::Repair) else {
            return;
        };

        tracing::info!(
            "Chunk {} dropped to {}/{} replicas, scheduling repair",
            key,
            state.current_degree(),
            state.desired_degree()
        );

        let peer = self.clone();
        tokio::spawn(async move {
            jitter().await;
            if handle.is_cancelled() {
                tracing::debug!("Repair of chunk {} cancelled", key);
                return;
            }

            let chunk = match peer.store.get(&key) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("Cannot repair chunk {}: {}", key, e);
                    return;
                }
            };
            if let Err(e) = peer.backup_chunk(&chunk, Some(handle.token())).await {
                tracing::warn!("Repair of chunk {} failed: {}", key, e);
            }
        });
    }
}
