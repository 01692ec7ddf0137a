//! Chunk Storage Module
//!
//! Everything a peer keeps on its own disk: replicas of other peers' chunks, the
//! replication state it has learned about them, its capacity ledger and the manifest of
//! files it backed up itself.
//!
//! ## Core Concepts
//! - **Chunking**: Files are cut into fixed-size chunks addressed by `(FileId, index)`.
//! - **Holder sets**: A chunk's current degree is the number of distinct peers known to hold it.
//! - **Ledger**: `used_bytes` never exceeds `capacity_bytes`; reclaiming lowers the capacity.
//! - **Snapshot**: The index, ledger and manifest are persisted as a single bincode file.

pub mod chunker;
pub mod manifest;
pub mod store;
pub mod types;
