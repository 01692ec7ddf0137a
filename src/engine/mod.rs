//! Replication Protocol Engine
//!
//! The per-peer state machine: it decides what to send, what to store and when to retry,
//! repair or give up. Every inbound message is decoded once and handled on its own task;
//! every multi-round flow (chunk backup, GETCHUNK retries, confirmed delete, reclaim,
//! repair, self-check) runs as an independent task that only shares state through the
//! [`Peer`] context.
//!
//! ## Flows
//! - **backup**: PUTCHUNK with exponential backoff until enough distinct STORED answers.
//! - **restore**: GETCHUNK per index, chunks reassembled behind a one-shot gate per file.
//! - **delete**: DELETE by file id, optionally confirmed by DELETEDCHUNK acknowledgements.
//! - **reclaim**: Two-pass eviction announcing REMOVED; holders repair what fell below degree.

pub mod backup;
pub mod delete;
pub mod peer;
pub mod reclaim;
pub mod restore;
pub mod types;


pub use peer::Peer;

use rand::Rng;
use std::time::Duration;

/// Upper bound of the random delay before answering a broadcast.
pub const JITTER_MAX_MS: u64 = 400;

/// Sleeps 0..=400 ms so that peers answering the same broadcast do not collide.
pub(crate) async fn jitter() {
    let delay = rand::thread_rng().gen_range(0..=JITTER_MAX_MS);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
