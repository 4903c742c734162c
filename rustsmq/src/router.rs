//! HTTP router for the queue server

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use rustsmq_queue::QueueClient;

use crate::handlers;

/// Shared state for the handlers
pub struct AppState {
    pub client: QueueClient,
}

impl AppState {
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/", post(handlers::handle_request))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status": "running"}"#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::new(QueueClient::ephemeral()))
    }

    async fn call(app: &Router, target: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(handlers::TARGET_HEADER, target)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        assert!(response.headers().contains_key(handlers::REQUEST_ID_HEADER));
        assert!(response.headers().contains_key(handlers::TRACE_ID_HEADER));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_receive_delete() {
        let app = app();
        let (status, _) = call(&app, "RSMQ.CreateQueue", json!({"qname": "jobs"})).await;
        assert_eq!(status, StatusCode::OK);

        let (status, sent) = call(
            &app,
            "RSMQ.SendMessage",
            json!({"qname": "jobs", "message": "hello"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = sent["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 32);

        let (_, received) = call(&app, "RSMQ.ReceiveMessage", json!({"qname": "jobs"})).await;
        assert_eq!(received["message"]["id"], id.as_str());
        assert_eq!(received["message"]["message"], "hello");
        assert_eq!(received["message"]["rc"], 1);
        assert!(received["message"]["lease_expires_at"].is_i64());

        let (_, deleted) = call(
            &app,
            "RSMQ.DeleteMessage",
            json!({"qname": "jobs", "id": id}),
        )
        .await;
        assert_eq!(deleted["deleted"], true);

        let (_, received) = call(&app, "RSMQ.ReceiveMessage", json!({"qname": "jobs"})).await;
        assert!(received["message"].is_null());
    }

    #[tokio::test]
    async fn test_error_codes() {
        let app = app();
        let (status, body) = call(&app, "RSMQ.Frobnicate", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "UnknownOperation");

        let (status, body) = call(&app, "RSMQ.SendMessage", json!({"qname": "ghost", "message": "x"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "QueueNotFound");

        let (_, body) = call(&app, "RSMQ.CreateQueue", json!({})).await;
        assert_eq!(body["__type"], "MissingParameter");

        let (_, body) = call(&app, "RSMQ.CreateQueue", json!({"qname": "jobs", "vt": "soon"})).await;
        assert_eq!(body["__type"], "MalformedRequest");

        let (_, body) = call(&app, "RSMQ.CreateQueue", json!({"qname": "jobs", "maxsize": 10})).await;
        assert_eq!(body["__type"], "InvalidParameter");
    }

    #[tokio::test]
    async fn test_negative_wait_is_invalid() {
        let app = app();
        call(&app, "RSMQ.CreateQueue", json!({"qname": "jobs"})).await;

        let (status, body) = call(
            &app,
            "RSMQ.ReceiveMessage",
            json!({"qname": "jobs", "wait": -1}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidParameter");

        let (status, body) = call(&app, "RSMQ.ReceiveMessage", json!({"qname": "jobs", "wait": 0})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].is_null());
    }

    #[tokio::test]
    async fn test_missing_target_header() {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("{}"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
