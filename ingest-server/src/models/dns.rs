//! Observed DNS models

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use validator::Validate;

/// One DNS answer seen by a sensor: `hostname` resolved to `addresses`
#[derive(Debug, Deserialize, Validate)]
pub struct DnsObservation {
    #[validate(length(min = 1, max = 253))]
    pub hostname: String,

    #[validate(length(min = 1, max = 64))]
    pub addresses: Vec<IpAddr>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DnsObservationResponse {
    pub hostname: String,
    pub stored: usize,
    pub dropped: usize,
}
