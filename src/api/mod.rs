//! HTTP state API served by every agent.
//!
//! | Route               | Method | Result                                     |
//! |---------------------|--------|--------------------------------------------|
//! | `/state/{id}`       | GET    | 200 + document, 404 if absent              |
//! | `/state/{id}`       | PUT    | 201 created, 200 replaced, 400 malformed   |
//! | `/state/{id}`       | DELETE | 204 deleted, 404 if absent                 |
//! | `/heartbeat`        | GET    | 200 while the API is up                    |
//! | `/events`           | GET    | 200 if an instruction receiver is online   |

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::CoordError;
use crate::state::client::{EVENTS_ROUTE, HEARTBEAT_ROUTE, STATE_ROUTE};
use crate::state::{Document, InMemoryStateStore, StateStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<InMemoryStateStore>,
}

impl ApiState {
    pub fn new(store: Arc<InMemoryStateStore>) -> Self {
        Self { store }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    online: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            &format!("{}/:id", STATE_ROUTE),
            get(get_state_handler)
                .put(put_state_handler)
                .delete(delete_state_handler),
        )
        .route(HEARTBEAT_ROUTE, get(heartbeat_handler))
        .route(EVENTS_ROUTE, get(events_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Starting state API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!(addr = %addr, "State API server stopped");
    Ok(())
}

async fn get_state_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id).await {
        Ok(Some(doc)) => Json(doc).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("document '{}' not found", id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// The path ID wins over any `id` in the body; the body may also be a bare
/// definition without the `{id, definition}` envelope.
async fn put_state_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let definition = match body {
        Value::Object(mut map) if map.contains_key("definition") => {
            map.remove("definition").unwrap_or(Value::Null)
        }
        other => other,
    };
    let doc = Document {
        id: id.clone(),
        definition,
    };

    match state.store.put(doc).await {
        Ok(true) => StatusCode::CREATED.into_response(),
        Ok(false) => StatusCode::OK.into_response(),
        Err(e @ CoordError::InvalidDocument { .. }) => {
            tracing::warn!(document = %id, error = %e, "Rejected malformed document");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn delete_state_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.delete(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("document '{}' not found", id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn heartbeat_handler() -> impl IntoResponse {
    Json(StatusResponse { online: true })
}

async fn events_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let online = matches!(state.store.events_online().await, Ok(true));
    let status = if online {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(StatusResponse { online }))
}
