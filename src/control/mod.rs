//! Operator Control Surface
//!
//! HTTP/JSON front end over the peer's backup, restore, delete and reclaim operations.

pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;

use crate::engine::Peer;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use handlers::{handle_backup, handle_delete, handle_reclaim, handle_restore, handle_state};
use protocol::{ENDPOINT_BACKUP, ENDPOINT_DELETE, ENDPOINT_RECLAIM, ENDPOINT_RESTORE, ENDPOINT_STATE};
use std::sync::Arc;

pub fn router(peer: Arc<Peer>) -> Router {
    Router::new()
        .route(ENDPOINT_BACKUP, post(handle_backup))
        .route(ENDPOINT_RESTORE, post(handle_restore))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_RECLAIM, post(handle_reclaim))
        .route(ENDPOINT_STATE, get(handle_state))
        .layer(Extension(peer))
}
