//! Stats handler

use axum::{extract::State, Json};
use flowsense_core::StatsSnapshot;

use crate::{AppState, AppResult};

/// Counters and recent prediction latencies
pub async fn get(State(state): State<AppState>) -> AppResult<Json<StatsSnapshot>> {
    Ok(Json(state.pipeline.stats_snapshot().await?))
}
