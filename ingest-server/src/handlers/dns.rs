//! Observed DNS handler

use axum::{extract::State, Json};
use validator::Validate;

use crate::extract::AppJson;
use crate::models::{DnsObservation, DnsObservationResponse};
use crate::{AppState, AppResult};

/// Record a DNS answer so later flows to these addresses can be labeled
/// by hostname
pub async fn observe(
    State(state): State<AppState>,
    AppJson(req): AppJson<DnsObservation>,
) -> AppResult<Json<DnsObservationResponse>> {
    req.validate()?;

    let cache = state.pipeline.dns_cache();
    let stored = req
        .addresses
        .iter()
        .filter(|ip| cache.observe(**ip, &req.hostname))
        .count();

    Ok(Json(DnsObservationResponse {
        dropped: req.addresses.len() - stored,
        stored,
        hostname: req.hostname,
    }))
}
