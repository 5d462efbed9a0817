//! HTTP API
//!
//! JSON endpoints mirroring the node protocol operations, plus health and
//! Prometheus metrics. Request and response bodies carry the same fields as
//! the node protocol bodies, without `type`/`msg_id`.

use crate::broker::{
    Broker, CommitOffsetsRequest, CommitOffsetsResponse, ListCommittedOffsetsRequest,
    ListCommittedOffsetsResponse, PollRequest, PollResponse, Request as BrokerRequest,
    Response as BrokerResponse, SendRequest, SendResponse,
};
use crate::common::{timestamp_now_millis, Error, Result, METRICS};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        let body = json!({
            "error": self.to_string(),
            "code": self.to_rpc_code(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn create_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/append", post(send))
        .route("/poll", post(poll))
        .route("/commit_offsets", post(commit_offsets))
        .route("/list_committed_offsets", post(list_committed_offsets))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_id_middleware)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Tag each request with an id (taken from `x-request-id` or generated) and
/// log its completion inside a span carrying that id.
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| {
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), duration_ms, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), duration_ms, "Request completed");
        }
    });

    response
}

fn extract<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::MalformedRequest(rejection.body_text()))
}

async fn run(state: &AppState, request: BrokerRequest) -> Result<BrokerResponse> {
    request.validate()?;
    state.broker.dispatch(request).await
}

fn unexpected(response: BrokerResponse) -> Error {
    Error::Internal(format!("unexpected broker response: {:?}", response))
}

async fn send(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>> {
    match run(&state, BrokerRequest::Send(extract(payload)?)).await? {
        BrokerResponse::Send(resp) => Ok(Json(resp)),
        other => Err(unexpected(other)),
    }
}

async fn poll(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PollRequest>, JsonRejection>,
) -> Result<Json<PollResponse>> {
    match run(&state, BrokerRequest::Poll(extract(payload)?)).await? {
        BrokerResponse::Poll(resp) => Ok(Json(resp)),
        other => Err(unexpected(other)),
    }
}

async fn commit_offsets(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CommitOffsetsRequest>, JsonRejection>,
) -> Result<Json<CommitOffsetsResponse>> {
    match run(&state, BrokerRequest::CommitOffsets(extract(payload)?)).await? {
        BrokerResponse::CommitOffsets(resp) => Ok(Json(resp)),
        other => Err(unexpected(other)),
    }
}

async fn list_committed_offsets(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ListCommittedOffsetsRequest>, JsonRejection>,
) -> Result<Json<ListCommittedOffsetsResponse>> {
    match run(&state, BrokerRequest::ListCommittedOffsets(extract(payload)?)).await? {
        BrokerResponse::ListCommittedOffsets(resp) => Ok(Json(resp)),
        other => Err(unexpected(other)),
    }
}

/// Liveness and version
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "timestamp_ms": timestamp_now_millis(),
    }))
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
