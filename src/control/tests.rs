//! Control Surface Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

#[cfg(test)]
mod tests {
    use crate::config::PeerConfig;
    use crate::control::protocol::OperationResponse;
    use crate::control::router;
    use crate::engine::Peer;
    use crate::engine::types::{BackupOutcome, DeleteOutcome, PeerReport, ReclaimOutcome, RestoreOutcome};
    use crate::network::memory::MemoryNetwork;
    use crate::network::types::PeerId;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn spawn(network: &Arc<MemoryNetwork>, name: &str) -> (Arc<Peer>, TempDir) {
        let dir = TempDir::new().unwrap();
        let (transport, inbound) = network.join();
        let peer = Peer::open(PeerConfig::new(PeerId(name.to_string()), dir.path()), transport).unwrap();
        peer.start(inbound);
        (peer, dir)
    }

    async fn call<T: DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, T) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ============================================================
    // VALIDATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_backup_rejects_degree_out_of_range() {
        let network = MemoryNetwork::new();
        let (peer, _dir) = spawn(&network, "a");
        let app = router(peer);

        for degree in [0, 10] {
            let (status, response): (_, OperationResponse<BackupOutcome>) = call(
                &app,
                "POST",
                "/backup",
                serde_json::json!({ "filename": "x", "replication_degree": degree }),
            )
            .await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(response.outcome.is_none());
            assert!(response.error.is_some());
        }
    }

    // ============================================================
    // OPERATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unknown_files_report_not_found() {
        let network = MemoryNetwork::new();
        let (peer, _dir) = spawn(&network, "a");
        let app = router(peer);

        let (status, backup): (_, OperationResponse<BackupOutcome>) = call(
            &app,
            "POST",
            "/backup",
            serde_json::json!({ "filename": "/nonexistent/file", "replication_degree": 2 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backup.outcome, Some(BackupOutcome::FileNotFound));

        let (_, restore): (_, OperationResponse<RestoreOutcome>) = call(
            &app,
            "POST",
            "/restore",
            serde_json::json!({ "filename": "unknown" }),
        )
        .await;
        assert_eq!(restore.outcome, Some(RestoreOutcome::FileNotFound));

        let (_, delete): (_, OperationResponse<DeleteOutcome>) = call(
            &app,
            "POST",
            "/delete",
            serde_json::json!({ "filename": "unknown" }),
        )
        .await;
        assert_eq!(delete.outcome, Some(DeleteOutcome::FileNotFound));
    }

    #[tokio::test]
    async fn test_reclaim_reports_usage_limit() {
        let network = MemoryNetwork::new();
        let (peer, _dir) = spawn(&network, "a");
        let app = router(peer);

        let (_, reclaim): (_, OperationResponse<ReclaimOutcome>) = call(
            &app,
            "POST",
            "/reclaim",
            serde_json::json!({ "bytes": 1000 }),
        )
        .await;
        assert_eq!(
            reclaim.outcome,
            Some(ReclaimOutcome::ExceedsUsage {
                target_bytes: 1000,
                used_bytes: 0
            })
        );

        let (_, reclaim): (_, OperationResponse<ReclaimOutcome>) =
            call(&app, "POST", "/reclaim", serde_json::json!({ "bytes": 0 })).await;
        assert_eq!(
            reclaim.outcome,
            Some(ReclaimOutcome::Started { target_bytes: 0 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_then_state() {
        let network = MemoryNetwork::new();
        let (peer, _dir) = spawn(&network, "a");
        let (_other, _other_dir) = spawn(&network, "b");
        let app = router(peer);

        let source = TempDir::new().unwrap();
        let path = source.path().join("notes.txt");
        std::fs::write(&path, b"some notes").unwrap();

        let (status, backup): (_, OperationResponse<BackupOutcome>) = call(
            &app,
            "POST",
            "/backup",
            serde_json::json!({ "filename": path, "replication_degree": 1 }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(
            backup.outcome,
            Some(BackupOutcome::Completed { chunks: 1, .. })
        ));

        let (status, report): (_, PeerReport) =
            call(&app, "GET", "/state", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.peer_id, PeerId("a".to_string()));
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].desired_degree, 1);
    }
}
