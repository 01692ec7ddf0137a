//! Replication Bookkeeping Module
//!
//! Shared state that the protocol flows coordinate through.
//!
//! ## Components
//! - **ReplicaTracker**: Who is known to hold which chunk, counted by distinct peer identity.
//! - **PendingOperationRegistry**: At most one in-flight backup, repair or restore job per chunk,
//!   each with a cooperative cancellation token.

pub mod pending;
pub mod tracker;
