//! Wire Protocol
//!
//! Messages exchanged between peers on the group and direct channels, and their ASCII
//! header codec:
//!
//! ```text
//! <Type> <Version> <SenderId> <FileId> [<ChunkIndex>] [<Extra>...] CRLF CRLF [<payload>]
//! ```
//!
//! Decoding happens once at the transport boundary; everything past it matches on
//! [`message::Body`].

pub mod message;

#[cfg(test)]
mod tests;
