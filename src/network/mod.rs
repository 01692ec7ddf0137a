//! Network Channels Module
//!
//! Carries protocol datagrams between peers. The protocol engine never talks to sockets
//! directly: it sends bytes to a logical [`types::Channel`] and receives [`types::Envelope`]s
//! from a single inbound queue.
//!
//! ## Channels
//! - **Control**: small header-only messages (STORED, GETCHUNK, DELETE, REMOVED, DELETEDCHUNK).
//! - **Push**: PUTCHUNK messages carrying chunk payloads to be stored.
//! - **Pull**: CHUNK messages carrying payloads back to a restoring peer.
//! - **Direct**: optional point-to-point channel used to answer a GETCHUNK without broadcasting.
//!
//! ## Implementations
//! - `multicast`: UDP multicast groups plus a TCP listener for the direct channel.
//! - `memory`: an in-process hub used by simulations and tests.

pub mod memory;
pub mod multicast;
pub mod transport;
pub mod types;
