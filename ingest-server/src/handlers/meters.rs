//! Meter ID translation handlers

use axum::{extract::Path, Json};
use flowsense_core::{decode_meter_id, encode_meter_id};

use crate::models::MeterIdResponse;
use crate::AppResult;

/// External meter string → internal ID
pub async fn decode(Path(external): Path<String>) -> AppResult<Json<MeterIdResponse>> {
    let internal = decode_meter_id(&external)?;
    Ok(Json(MeterIdResponse { external, internal }))
}

/// Internal ID → canonical external string
pub async fn encode(Path(internal): Path<u32>) -> Json<MeterIdResponse> {
    Json(MeterIdResponse {
        external: encode_meter_id(internal),
        internal,
    })
}
