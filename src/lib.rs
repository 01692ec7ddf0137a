//! Peer-to-Peer Chunk Backup Library
//!
//! Core of a backup service in which independent peers keep replicas of each other's file
//! chunks, talking over multicast group channels and point-to-point connections.
//!
//! ## Architecture Modules
//! - **`config`**: Peer settings and command-line flags.
//! - **`control`**: HTTP/JSON operator surface (backup, restore, delete, reclaim, state).
//! - **`engine`**: The replication protocol state machine and the `Peer` context object.
//! - **`network`**: Peer identity, logical channels and the transports (multicast, in-memory).
//! - **`protocol`**: Wire messages and the ASCII header codec.
//! - **`replication`**: Set-based replica tracking and cancellable pending operations.
//! - **`storage`**: Chunking, the local chunk store, its capacity ledger and the manifest.

pub mod config;
pub mod control;
pub mod engine;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod storage;
