//! In-process network hub.
//!
//! Behaves like a loss-free multicast segment: a group send reaches every joined endpoint,
//! the sender included, and a direct send reaches exactly one endpoint. Endpoints are
//! addressed by synthetic loopback socket addresses.

use super::transport::Transport;
use super::types::{Channel, Envelope};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use tokio::sync::mpsc;

const FIRST_PORT: u16 = 40_000;

pub struct MemoryNetwork {
    endpoints: DashMap<SocketAddr, mpsc::UnboundedSender<Envelope>>,
    next_port: AtomicU16,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: DashMap::new(),
            next_port: AtomicU16::new(FIRST_PORT),
        })
    }

    /// Attaches a new endpoint and returns its transport and inbound queue.
    pub fn join(self: &Arc<Self>) -> (Arc<MemoryTransport>, mpsc::UnboundedReceiver<Envelope>) {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.insert(addr, tx);

        let transport = Arc::new(MemoryTransport {
            network: self.clone(),
            addr,
        });
        (transport, rx)
    }

    /// Detaches an endpoint; it stops receiving anything.
    pub fn leave(&self, addr: &SocketAddr) {
        self.endpoints.remove(addr);
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn broadcast(&self, from: SocketAddr, channel: Channel, bytes: &[u8]) {
        let mut closed = Vec::new();
        for entry in self.endpoints.iter() {
            let envelope = Envelope {
                channel,
                sender: from,
                bytes: bytes.to_vec(),
            };
            if entry.value().send(envelope).is_err() {
                closed.push(*entry.key());
            }
        }
        for addr in closed {
            self.endpoints.remove(&addr);
        }
    }

    fn unicast(&self, from: SocketAddr, target: SocketAddr, bytes: &[u8]) -> Result<()> {
        let endpoint = self
            .endpoints
            .get(&target)
            .ok_or_else(|| anyhow::anyhow!("No endpoint at {}", target))?;
        endpoint
            .send(Envelope {
                channel: Channel::Direct,
                sender: from,
                bytes: bytes.to_vec(),
            })
            .map_err(|_| anyhow::anyhow!("Endpoint at {} is closed", target))
    }
}

pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    addr: SocketAddr,
}

impl MemoryTransport {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, channel: Channel, bytes: &[u8]) -> Result<()> {
        if channel == Channel::Direct {
            return Err(anyhow::anyhow!("direct is not a group channel"));
        }
        self.network.broadcast(self.addr, channel, bytes);
        Ok(())
    }

    async fn send_direct(&self, target: SocketAddr, bytes: &[u8]) -> Result<()> {
        self.network.unicast(self.addr, target, bytes)
    }

    fn direct_port(&self) -> Option<u16> {
        Some(self.addr.port())
    }
}
