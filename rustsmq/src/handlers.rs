//! HTTP handlers for the queue protocol
//!
//! Every operation is a `POST /` whose `x-rsmq-target` header names the
//! operation (`RSMQ.<Operation>`) and whose body is a JSON object.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use rustsmq_core::{ApiError, ErrorCode, RequestId};
pub use rustsmq_core::request_id::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use rustsmq_queue::{Message, QueueClient, QueueError, QueueOptions};

use crate::router::AppState;

/// Header naming the operation
pub const TARGET_HEADER: &str = "x-rsmq-target";

const TARGET_PREFIX: &str = "RSMQ.";

/// Dispatch a request on its `x-rsmq-target` header
pub async fn handle_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();

    let target = match headers.get(TARGET_HEADER) {
        Some(t) => match t.to_str() {
            Ok(s) => s,
            Err(_) => {
                return error_response(
                    ApiError::new(ErrorCode::MalformedRequest, "Invalid target header"),
                    &request_id,
                )
            }
        },
        None => {
            return error_response(
                ApiError::new(
                    ErrorCode::MissingParameter,
                    format!("Missing {} header", TARGET_HEADER),
                ),
                &request_id,
            )
        }
    };

    let operation = target.strip_prefix(TARGET_PREFIX).unwrap_or(target);
    debug!(operation = %operation, request_id = %request_id, "RSMQ request");

    let client = &state.client;
    let result = match operation {
        "CreateQueue" => handle_create_queue(client, &body).await,
        "DeleteQueue" => handle_delete_queue(client, &body).await,
        "ListQueues" => handle_list_queues(client).await,
        "GetQueueAttributes" => handle_get_queue_attributes(client, &body).await,
        "SetQueueAttributes" => handle_set_queue_attributes(client, &body).await,
        "SendMessage" => handle_send_message(client, &body).await,
        "ReceiveMessage" => handle_receive_message(client, &body).await,
        "PopMessage" => handle_pop_message(client, &body).await,
        "ChangeMessageVisibility" => handle_change_message_visibility(client, &body).await,
        "DeleteMessage" => handle_delete_message(client, &body).await,
        _ => {
            warn!(target = %target, "Unknown RSMQ operation");
            Err(ApiError::new(
                ErrorCode::UnknownOperation,
                format!("Unknown operation: {}", target),
            ))
        }
    };

    match result {
        Ok(response_body) => json_response(StatusCode::OK, &response_body, &request_id),
        Err(e) => error_response(e, &request_id),
    }
}

// === Request bodies ===

#[derive(Debug, Deserialize)]
struct QueueRequest {
    qname: String,
}

#[derive(Debug, Deserialize)]
struct QueueAttributesRequest {
    qname: String,
    vt: Option<i64>,
    delay: Option<i64>,
    maxsize: Option<i64>,
}

impl QueueAttributesRequest {
    fn options(&self) -> QueueOptions {
        QueueOptions {
            vt: self.vt,
            delay: self.delay,
            maxsize: self.maxsize,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    qname: String,
    message: String,
    delay: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReceiveMessageRequest {
    qname: String,
    vt: Option<i64>,
    /// Seconds to long poll for
    wait: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    qname: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChangeVisibilityRequest {
    qname: String,
    id: String,
    vt: i64,
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| {
        let message = e.to_string();
        if message.starts_with("missing field") {
            ApiError::new(ErrorCode::MissingParameter, message)
        } else {
            ApiError::new(ErrorCode::MalformedRequest, format!("Invalid JSON: {}", message))
        }
    })
}

// === Handlers ===

async fn handle_create_queue(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: QueueAttributesRequest = parse(body)?;
    client
        .create_queue(&request.qname, request.options())
        .await
        .map_err(queue_error)?;
    Ok(json!({}))
}

async fn handle_delete_queue(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: QueueRequest = parse(body)?;
    client
        .delete_queue(&request.qname)
        .await
        .map_err(queue_error)?;
    Ok(json!({}))
}

async fn handle_list_queues(client: &QueueClient) -> Result<Value, ApiError> {
    let queues = client.list_queues().await.map_err(queue_error)?;
    Ok(json!({ "queues": queues }))
}

async fn handle_get_queue_attributes(
    client: &QueueClient,
    body: &Bytes,
) -> Result<Value, ApiError> {
    let request: QueueRequest = parse(body)?;
    let attributes = client
        .get_queue_attributes(&request.qname)
        .await
        .map_err(queue_error)?;
    Ok(json!(attributes))
}

async fn handle_set_queue_attributes(
    client: &QueueClient,
    body: &Bytes,
) -> Result<Value, ApiError> {
    let request: QueueAttributesRequest = parse(body)?;
    let attributes = client
        .set_queue_attributes(&request.qname, request.options())
        .await
        .map_err(queue_error)?;
    Ok(json!(attributes))
}

async fn handle_send_message(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: SendMessageRequest = parse(body)?;
    let id = client
        .send_message(&request.qname, request.message, request.delay)
        .await
        .map_err(queue_error)?;
    Ok(json!({ "id": id }))
}

async fn handle_receive_message(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: ReceiveMessageRequest = parse(body)?;
    let wait = match request.wait {
        Some(secs) => client.config().wait(secs).map_err(queue_error)?,
        None => Duration::ZERO,
    };
    let message = if wait.is_zero() {
        client.receive_message(&request.qname, request.vt).await
    } else {
        client
            .receive_message_wait(&request.qname, request.vt, wait)
            .await
    }
    .map_err(queue_error)?;
    Ok(json!({ "message": message.as_ref().map(snapshot) }))
}

async fn handle_pop_message(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: QueueRequest = parse(body)?;
    let message = client
        .pop_message(&request.qname)
        .await
        .map_err(queue_error)?;
    Ok(json!({ "message": message.as_ref().map(snapshot) }))
}

async fn handle_change_message_visibility(
    client: &QueueClient,
    body: &Bytes,
) -> Result<Value, ApiError> {
    let request: ChangeVisibilityRequest = parse(body)?;
    client
        .change_message_visibility(&request.qname, &request.id, request.vt)
        .await
        .map_err(queue_error)?;
    Ok(json!({}))
}

async fn handle_delete_message(client: &QueueClient, body: &Bytes) -> Result<Value, ApiError> {
    let request: MessageRequest = parse(body)?;
    let deleted = client
        .delete_message(&request.qname, &request.id)
        .await
        .map_err(queue_error)?;
    Ok(json!({ "deleted": deleted }))
}

// === Response helpers ===

/// Wire form of a received message; timestamps are unix milliseconds
fn snapshot(message: &Message) -> Value {
    json!({
        "id": message.id,
        "message": String::from_utf8_lossy(&message.payload),
        "rc": message.receive_count,
        "sent": message.sent_at.timestamp_millis(),
        "fr": message.first_received_at.map(|at| at.timestamp_millis()),
        "lease_expires_at": message.lease_expires_at.map(|at| at.timestamp_millis()),
    })
}

fn queue_error(err: QueueError) -> ApiError {
    match &err {
        QueueError::BackendUnavailable(msg) => warn!(error = %msg, "Backend unavailable"),
        QueueError::Internal(msg) => error!(error = %msg, "Internal queue error"),
        _ => {}
    }
    ApiError::new(err.code(), err.to_string())
}

fn json_response(status: StatusCode, body: &Value, request_id: &RequestId) -> Response {
    respond(status, body.to_string(), request_id)
}

fn error_response(error: ApiError, request_id: &RequestId) -> Response {
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    respond(status, error.to_json(), request_id)
}

fn respond(status: StatusCode, body: String, request_id: &RequestId) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in request_id.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
