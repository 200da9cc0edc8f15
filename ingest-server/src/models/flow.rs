//! Flow ingestion models

use flowsense_core::{FlowContext, FlowRequest, FlowSample};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct IngestFlowRequest {
    #[validate(length(min = 1, max = 128))]
    pub flow_id: String,

    /// (packets × bytes) digest, nested or flattened
    pub sample: FlowSample,

    pub source_ip: Option<IpAddr>,
    pub destination_ip: Option<IpAddr>,

    /// SNI / Host / DNS query name seen for the flow
    #[validate(length(min = 1, max = 253))]
    pub hostname: Option<String>,
}

impl From<IngestFlowRequest> for FlowRequest {
    fn from(req: IngestFlowRequest) -> Self {
        FlowRequest {
            flow_id: req.flow_id,
            sample: req.sample,
            context: FlowContext {
                source_ip: req.source_ip,
                destination_ip: req.destination_ip,
                hostname: req.hostname,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestFlowResponse {
    pub accepted: bool,
    pub flow_id: String,
}
