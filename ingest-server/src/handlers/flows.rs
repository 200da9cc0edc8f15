//! Flow ingestion handler

use axum::{extract::State, http::StatusCode, Json};
use validator::Validate;

use crate::extract::AppJson;
use crate::models::{IngestFlowRequest, IngestFlowResponse};
use crate::{AppState, AppResult};

/// Accept a flow for classification.
///
/// 202 means the flow passed shape validation and was handed to the
/// pipeline; the result arrives later on the stats and live feeds.
pub async fn ingest(
    State(state): State<AppState>,
    AppJson(req): AppJson<IngestFlowRequest>,
) -> AppResult<(StatusCode, Json<IngestFlowResponse>)> {
    req.validate()?;

    let ack = state.pipeline.submit(req.into())?;
    tracing::debug!("Flow accepted: {}", ack.flow_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestFlowResponse {
            accepted: ack.accepted,
            flow_id: ack.flow_id,
        }),
    ))
}
