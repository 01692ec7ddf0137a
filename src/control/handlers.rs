use super::protocol::*;
use crate::engine::Peer;
use crate::engine::types::{BackupOutcome, DeleteOutcome, PeerReport, ReclaimOutcome, RestoreOutcome};

use axum::{Extension, Json, http::StatusCode};
use std::path::Path;
use std::sync::Arc;

type Reply<T> = (StatusCode, Json<OperationResponse<T>>);

fn completed<T>(outcome: T) -> Reply<T> {
    (StatusCode::OK, Json(OperationResponse::ok(outcome)))
}

fn internal_error<T>(operation: &str, e: anyhow::Error) -> Reply<T> {
    tracing::error!("{} failed: {}", operation, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(OperationResponse::failed(e.to_string())),
    )
}

pub async fn handle_backup(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<BackupRequest>,
) -> Reply<BackupOutcome> {
    if !(MIN_REPLICATION_DEGREE..=MAX_REPLICATION_DEGREE).contains(&req.replication_degree) {
        return (
            StatusCode::BAD_REQUEST,
            Json(OperationResponse::failed(format!(
                "replication degree must be between {} and {}",
                MIN_REPLICATION_DEGREE, MAX_REPLICATION_DEGREE
            ))),
        );
    }

    tracing::info!(
        "BACKUP {} with degree {}",
        req.filename,
        req.replication_degree
    );
    match peer
        .backup(Path::new(&req.filename), req.replication_degree)
        .await
    {
        Ok(outcome) => completed(outcome),
        Err(e) => internal_error("Backup", e),
    }
}

pub async fn handle_restore(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<RestoreRequest>,
) -> Reply<RestoreOutcome> {
    tracing::info!("RESTORE {}", req.filename);
    match peer.restore(&req.filename).await {
        Ok(outcome) => completed(outcome),
        Err(e) => internal_error("Restore", e),
    }
}

pub async fn handle_delete(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<DeleteRequest>,
) -> Reply<DeleteOutcome> {
    tracing::info!("DELETE {}", req.filename);
    match peer.delete(&req.filename).await {
        Ok(outcome) => completed(outcome),
        Err(e) => internal_error("Delete", e),
    }
}

pub async fn handle_reclaim(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<ReclaimRequest>,
) -> Reply<ReclaimOutcome> {
    tracing::info!("RECLAIM {} bytes", req.bytes);
    completed(peer.reclaim(req.bytes))
}

pub async fn handle_state(Extension(peer): Extension<Arc<Peer>>) -> (StatusCode, Json<PeerReport>) {
    (StatusCode::OK, Json(peer.report()))
}
