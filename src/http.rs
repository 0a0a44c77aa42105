//! HTTP transport for the admin surface.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /outbox/messages?offset=&limit=` - page through messages
//! - `GET /outbox/messages/:id` - one message
//! - `DELETE /outbox/messages/:id` - force-dequeue
//! - `POST /outbox/messages/:id/requeue` - force-requeue with a fresh attempt budget
//! - `GET /outbox/counts` - four-way counts
//! - `GET /outbox/health` - 200 when healthy or degraded, 503 when unhealthy
//!
//! Store calls are synchronous, so every handler runs them on tokio's
//! blocking pool.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::admin::{AdminRequest, AdminResponse, OutboxAdmin, DEFAULT_PAGE_SIZE};
use crate::store::MessageStore;

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Build an axum `Router` exposing the admin operations.
pub fn router<S: MessageStore + 'static>(admin: Arc<OutboxAdmin<S>>) -> Router {
    Router::new()
        .route("/outbox/messages", get(list_handler::<S>))
        .route(
            "/outbox/messages/:id",
            get(peek_handler::<S>).delete(dequeue_handler::<S>),
        )
        .route("/outbox/messages/:id/requeue", post(requeue_handler::<S>))
        .route("/outbox/counts", get(counts_handler::<S>))
        .route("/outbox/health", get(health_handler::<S>))
        .with_state(admin)
}

/// Serve the admin surface at the given address (e.g. `"0.0.0.0:3001"`).
pub async fn serve<S: MessageStore + 'static>(
    admin: Arc<OutboxAdmin<S>>,
    addr: &str,
) -> Result<(), std::io::Error> {
    let app = router(admin);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn list_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
    Query(page): Query<PageParams>,
) -> Response {
    dispatch(
        admin,
        AdminRequest::PeekAll {
            offset: page.offset,
            limit: page.limit,
        },
    )
    .await
}

async fn peek_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
    Path(sequence_id): Path<i64>,
) -> Response {
    dispatch(admin, AdminRequest::Peek { sequence_id }).await
}

async fn dequeue_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
    Path(sequence_id): Path<i64>,
) -> Response {
    dispatch(admin, AdminRequest::Dequeue { sequence_id }).await
}

async fn requeue_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
    Path(sequence_id): Path<i64>,
) -> Response {
    dispatch(admin, AdminRequest::Requeue { sequence_id }).await
}

async fn counts_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
) -> Response {
    dispatch(admin, AdminRequest::Counts).await
}

async fn health_handler<S: MessageStore + 'static>(
    State(admin): State<Arc<OutboxAdmin<S>>>,
) -> Response {
    let health = match tokio::task::spawn_blocking(move || admin.health()).await {
        Ok(health) => health,
        Err(err) => return join_failed(err),
    };
    let status = if health.status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

async fn dispatch<S: MessageStore + 'static>(
    admin: Arc<OutboxAdmin<S>>,
    request: AdminRequest,
) -> Response {
    match tokio::task::spawn_blocking(move || admin.handle(request)).await {
        Ok(response) => respond(response),
        Err(err) => join_failed(err),
    }
}

fn join_failed(err: tokio::task::JoinError) -> Response {
    error!(error = %err, "admin request task failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "admin request failed" })),
    )
        .into_response()
}

fn respond(response: AdminResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}
