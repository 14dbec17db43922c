//! Manual sync trigger.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Source;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
    #[serde(default)]
    pub resync: Option<String>,
}

impl SyncParams {
    fn wants_resync(&self) -> bool {
        matches!(
            self.resync.as_deref().map(str::trim),
            Some("true") | Some("1") | Some("yes")
        )
    }
}

#[derive(Debug, Serialize)]
pub struct SyncStartedResponse {
    pub status: &'static str,
}

/// POST /sync/{source} - Start a background run; `?resync=true` wipes the source first.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncStartedResponse>, AppError> {
    let source = source
        .parse::<Source>()
        .map_err(|_| AppError::NotFound(format!("Unknown source '{}'", source)))?;
    let resync = params.wants_resync();

    state.scheduler.trigger(source, resync)?;
    tracing::info!(source = %source, resync, "Sync triggered over HTTP");

    Ok(Json(SyncStartedResponse {
        status: "sync started",
    }))
}
