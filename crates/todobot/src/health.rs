// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Liveness endpoint.
//!
//! `GET /healthz` answers 200 "ok" while the queue accepts messages and 503
//! once shutdown has begun, so a platform health check stops routing to a
//! draining instance.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::info;

use todobot_core::TodobotError;
use todobot_queue::QueueManager;

pub fn router(manager: QueueManager) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(manager)
}

async fn healthz(State(manager): State<QueueManager>) -> (StatusCode, &'static str) {
    if manager.is_accepting() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}

/// Serve the health router on `host:port` until `cancel` fires.
pub async fn serve_health(
    host: &str,
    port: u16,
    manager: QueueManager,
    cancel: CancellationToken,
) -> Result<(), TodobotError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TodobotError::Channel {
            message: format!("failed to bind health endpoint to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    info!("health endpoint listening on {addr}");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| TodobotError::Channel {
            message: format!("health endpoint error: {e}"),
            source: Some(Box::new(e)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use todobot_test_utils::TestHarness;
    use tower::ServiceExt;

    async fn get_healthz(manager: &QueueManager) -> (StatusCode, String) {
        let response = router(manager.clone())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn ok_while_accepting_then_unavailable() {
        let mut harness = TestHarness::new().unwrap();
        let manager = harness.start().await.unwrap();

        assert_eq!(get_healthz(&manager).await, (StatusCode::OK, "ok".to_string()));

        manager.shutdown().await.unwrap();
        let (status, _) = get_healthz(&manager).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let mut harness = TestHarness::new().unwrap();
        let manager = harness.start().await.unwrap();

        let response = router(manager.clone())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        manager.shutdown().await.unwrap();
    }
}
