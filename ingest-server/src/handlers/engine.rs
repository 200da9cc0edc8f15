//! Engine status handler

use axum::{extract::State, Json};
use flowsense_core::EngineStatus;

use crate::AppState;

pub async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.pipeline.engine_status())
}
