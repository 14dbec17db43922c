//! Queue endpoints: submission, single pop and non-destructive peek.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{QueueItem, SubmitItemRequest};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitItemResponse {
    pub success: bool,
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct PeekResponse {
    pub count: usize,
    pub items: Vec<QueueItem>,
}

/// POST /queue - Enqueue a ready-made item, bypassing the sync engine.
///
/// The body is parsed by hand so that every malformed submission is a 400
/// in the usual error envelope, whatever the content type.
pub async fn submit_item(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmitItemResponse>, AppError> {
    let request: SubmitItemRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let new_item = request.into_new_item().map_err(AppError::Validation)?;

    let item = state.queue.enqueue(new_item).await;
    tracing::debug!(id = item.id, action = %item.action, bytes = item.content.len(), "Queued item");

    Ok(Json(SubmitItemResponse {
        success: true,
        id: item.id,
    }))
}

/// GET /pending - Pop the oldest item, or 204 when the queue is empty.
pub async fn pending(State(state): State<AppState>) -> Response {
    match state.queue.pop_oldest().await {
        Some(item) => {
            tracing::debug!(id = item.id, action = %item.action, "Delivered item via poll");
            Json(item).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// GET /peek - Snapshot of the queue without consuming anything.
pub async fn peek(State(state): State<AppState>) -> Json<PeekResponse> {
    let items = state.queue.peek_all().await;
    Json(PeekResponse {
        count: items.len(),
        items,
    })
}
