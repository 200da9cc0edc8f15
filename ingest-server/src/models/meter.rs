//! Meter ID models

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct MeterIdResponse {
    pub external: String,
    pub internal: u32,
}
