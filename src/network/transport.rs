use super::types::Channel;

use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;

/// Outbound half of a peer's network attachment.
///
/// Delivery is unordered and at-least-once at best; callers must not assume a sent
/// message arrives, arrives once, or arrives before a later one.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `bytes` to every peer listening on the group `channel`.
    async fn send(&self, channel: Channel, bytes: &[u8]) -> Result<()>;

    /// Sends `bytes` to a single peer over the point-to-point channel.
    async fn send_direct(&self, target: SocketAddr, bytes: &[u8]) -> Result<()>;

    /// Port other peers can reach this peer's direct channel on, if it has one.
    fn direct_port(&self) -> Option<u16>;
}
