//! UDP multicast group channels with a TCP side channel for direct replies.
//!
//! Every group channel gets its own socket and listener task; all of them feed the same
//! inbound queue so the engine sees a single stream of [`Envelope`]s.

use super::transport::Transport;
use super::types::{Channel, Envelope};
use crate::storage::types::MAX_CHUNK_SIZE;

use anyhow::Result;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;

const MAX_DATAGRAM: usize = 65_507;
const MAX_DIRECT_MESSAGE: u64 = (MAX_CHUNK_SIZE + 1024) as u64;
const DIRECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Multicast group addresses of the three group channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGroups {
    pub control: SocketAddrV4,
    pub push: SocketAddrV4,
    pub pull: SocketAddrV4,
}

impl ChannelGroups {
    pub fn group(&self, channel: Channel) -> Option<SocketAddrV4> {
        match channel {
            Channel::Control => Some(self.control),
            Channel::Push => Some(self.push),
            Channel::Pull => Some(self.pull),
            Channel::Direct => None,
        }
    }
}

impl Default for ChannelGroups {
    fn default() -> Self {
        Self {
            control: SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 1), 8001),
            push: SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 2), 8002),
            pull: SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 3), 8003),
        }
    }
}

pub struct MulticastTransport {
    groups: ChannelGroups,
    socket: UdpSocket,
    direct_port: u16,
}

impl MulticastTransport {
    /// Joins every group channel, opens the direct listener and starts one receive task
    /// per channel. Returns the transport and the inbound queue.
    pub async fn bind(
        groups: ChannelGroups,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Envelope>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        for channel in Channel::GROUPS {
            let Some(group) = groups.group(channel) else {
                continue;
            };
            let socket = join_group(group)?;
            tracing::info!("Joined {} channel on {}", channel, group);

            let tx = tx.clone();
            tokio::spawn(async move {
                receive_loop(channel, socket, tx).await;
            });
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let direct_port = listener.local_addr()?.port();
        tracing::info!("Direct channel listening on port {}", direct_port);
        tokio::spawn(async move {
            accept_loop(listener, tx).await;
        });

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(1)?;

        Ok((
            Arc::new(Self {
                groups,
                socket,
                direct_port,
            }),
            rx,
        ))
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    async fn send(&self, channel: Channel, bytes: &[u8]) -> Result<()> {
        let group = self
            .groups
            .group(channel)
            .ok_or_else(|| anyhow::anyhow!("{} is not a group channel", channel))?;
        self.socket.send_to(bytes, group).await?;
        Ok(())
    }

    async fn send_direct(&self, target: SocketAddr, bytes: &[u8]) -> Result<()> {
        let mut stream = tokio::time::timeout(DIRECT_TIMEOUT, TcpStream::connect(target)).await??;
        stream.write_all(bytes).await?;
        stream.shutdown().await?;
        Ok(())
    }

    fn direct_port(&self) -> Option<u16> {
        Some(self.direct_port)
    }
}

fn join_group(group: SocketAddrV4) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()));
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

async fn receive_loop(channel: Channel, socket: UdpSocket, tx: mpsc::UnboundedSender<Envelope>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let envelope = Envelope {
                    channel,
                    sender: src,
                    bytes: buf[..len].to_vec(),
                };
                if tx.send(envelope).is_err() {
                    tracing::info!("Inbound queue closed, stopping {} listener", channel);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to receive on {} channel: {}", channel, e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Envelope>) {
    loop {
        match listener.accept().await {
            Ok((stream, src)) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    match read_direct(stream).await {
                        Ok(bytes) if !bytes.is_empty() => {
                            let _ = tx.send(Envelope {
                                channel: Channel::Direct,
                                sender: src,
                                bytes,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Failed to read direct message from {}: {}", src, e),
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept direct connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_direct(stream: TcpStream) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut limited = stream.take(MAX_DIRECT_MESSAGE);
    tokio::time::timeout(DIRECT_TIMEOUT, limited.read_to_end(&mut bytes)).await??;
    Ok(bytes)
}
