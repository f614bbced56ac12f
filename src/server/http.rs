//! HTTP API for a nomad server
//!
//! - `GET  /nomad/discover`
//! - `POST /nomad/prepare`, `/nomad/commit`, `/nomad/rollback`, `/nomad/takeover`
//! - `GET  /nomad/changes?since=N`, `/nomad/changes/:change_id`
//! - `GET  /health/live`, `/metrics`
//!
//! Rejections are ordinary `200` responses carrying `accepted: false`; a
//! non-2xx status means the message was not processed.

use crate::common::{Error, Result};
use crate::protocol::{
    AcceptRejectResponse, CommitMessage, MutativeMessage, NomadChange, PrepareMessage,
    RollbackMessage, TakeoverMessage,
};
use crate::server::handle::ServerHandle;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub fn create_router<C: NomadChange>(handle: ServerHandle<C>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/nomad/discover", get(discover::<C>))
        .route("/nomad/prepare", post(prepare::<C>))
        .route("/nomad/commit", post(commit::<C>))
        .route("/nomad/rollback", post(rollback::<C>))
        .route("/nomad/takeover", post(takeover::<C>))
        .route("/nomad/changes", get(changes_since::<C>))
        .route("/nomad/changes/:change_id", get(get_change::<C>))
        .route("/health/live", get(health_live))
        .route("/metrics", get(metrics::<C>))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

fn reply(result: Result<AcceptRejectResponse>) -> Response {
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn discover<C: NomadChange>(State(handle): State<ServerHandle<C>>) -> Response {
    match handle.discover().await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn prepare<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Json(message): Json<PrepareMessage<C>>,
) -> Response {
    reply(handle.mutate(MutativeMessage::Prepare(message)).await)
}

async fn commit<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Json(message): Json<CommitMessage>,
) -> Response {
    reply(handle.mutate(MutativeMessage::Commit(message)).await)
}

async fn rollback<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Json(message): Json<RollbackMessage>,
) -> Response {
    reply(handle.mutate(MutativeMessage::Rollback(message)).await)
}

async fn takeover<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Json(message): Json<TakeoverMessage>,
) -> Response {
    reply(handle.mutate(MutativeMessage::Takeover(message)).await)
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: u64,
}

async fn changes_since<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Query(query): Query<SinceQuery>,
) -> Response {
    match handle.changes_since(query.since).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_change<C: NomadChange>(
    State(handle): State<ServerHandle<C>>,
    Path(change_id): Path<Uuid>,
) -> Response {
    match handle.get_change(change_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(Error::ChangeNotFound(change_id.to_string())),
        Err(e) => error_response(e),
    }
}

/// Liveness probe
async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
}

async fn metrics<C: NomadChange>(State(handle): State<ServerHandle<C>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.metrics().to_prometheus(handle.name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{MemoryChangeStore, NomadServer};
    use crate::settings::{ConfigChange, SettingsApplicator};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router(max_body_bytes: usize) -> Router {
        let server = NomadServer::<ConfigChange>::new(
            "node-1",
            Box::new(MemoryChangeStore::<ConfigChange>::new()),
            Arc::new(SettingsApplicator::new()),
        )
        .unwrap();
        create_router(ServerHandle::spawn(server), max_body_bytes)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_discover_fresh_server() {
        let response = router(4096)
            .oneshot(Request::get("/nomad/discover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["mode"], "ACCEPTING");
        assert_eq!(body["mutative_message_count"], 0);
        assert_eq!(body["current_version"], 0);
    }

    #[tokio::test]
    async fn test_stale_takeover_is_dead() {
        let message = json!({
            "mutation": {
                "expected_mutative_message_count": 7,
                "mutation_host": "host-a",
                "mutation_user": "alice",
                "mutation_timestamp": chrono::Utc::now(),
            }
        });
        let response = router(4096)
            .oneshot(
                Request::post("/nomad/takeover")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(message.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["rejection_reason"], "DEAD");
    }

    #[tokio::test]
    async fn test_unknown_change_is_not_found() {
        let uri = format!("/nomad/changes/{}", Uuid::new_v4());
        let response = router(4096)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let body = vec![b' '; 2048];
        let response = router(1024)
            .oneshot(
                Request::post("/nomad/prepare")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_exposed() {
        let response = router(4096)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("nomad_mutative_message_count{server=\"node-1\"} 0"));
    }
}
