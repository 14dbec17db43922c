//! HTTP surface.
//!
//! Handlers for the consumer-facing queue endpoints, the SSE stream and the
//! manual sync trigger. Errors render through `AppError`'s JSON envelope.

mod queue;
mod stream;
mod sync;

pub use queue::*;
pub use stream::*;
pub use sync::*;

use axum::Json;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health - Liveness check, no auth.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
